use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use wiretap_core::runner::{ReplayTemplate, RunProgress};

/// Terminal progress for a replay run: one overall bar and one line per
/// template. Hidden when stderr is not a terminal or output is JSON.
pub struct ProgressMonitor {
    overall: ProgressBar,
    lines: Mutex<HashMap<usize, ProgressBar>>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(templates: &[ReplayTemplate], enabled: bool) -> Self {
        if !enabled {
            return Self {
                overall: ProgressBar::hidden(),
                lines: Mutex::new(HashMap::new()),
                enabled: false,
            };
        }

        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(templates.len() as u64));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} requests {msg}")
        {
            overall.set_style(style.progress_chars("█▓▒░  "));
        }

        let mut lines = HashMap::with_capacity(templates.len());
        for (index, template) in templates.iter().enumerate() {
            let bar = multi.add(ProgressBar::new_spinner());
            if let Ok(style) = ProgressStyle::default_spinner().template("  {msg}") {
                bar.set_style(style);
            }
            bar.set_message(format!("… {} {}", template.method, template.url));
            lines.insert(index, bar);
        }

        Self {
            overall,
            lines: Mutex::new(lines),
            enabled: true,
        }
    }

    pub fn update(&self, progress: &RunProgress) {
        if !self.enabled {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = lines.remove(&progress.index) {
            let icon = if progress.success { "✔" } else { "✘" };
            bar.finish_with_message(format!("{icon} #{}", progress.index));
        }
        self.overall.set_position(progress.completed as u64);
        self.overall.set_message(format!(
            "ok {} / failed {}",
            progress.succeeded, progress.failed
        ));
    }

    pub fn finish(&self, status: &str) {
        if self.enabled {
            self.overall.finish_with_message(status.to_string());
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in lines.drain() {
            bar.finish_and_clear();
        }
    }
}
