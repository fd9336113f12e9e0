use std::sync::Arc;

use wiretap_core::runner::headers::{merge_headers, parse_header_text};
use wiretap_core::runner::{
    ProgressFn, RunConfig, RunExecution, RunProgress, RunStatus, TemplateHeaders,
};
use wiretap_core::RunnerError;

use super::cli::RunArgs;
use super::{print_json, read_templates, Runtime};
use crate::error::CliError;
use crate::progress::ProgressMonitor;

pub async fn run(args: RunArgs, rt: &Runtime, json: bool) -> Result<i32, CliError> {
    let mut config = match (&args.file, &args.collection_id) {
        (Some(path), _) => {
            let (templates, execution) = read_templates(path)?;
            RunConfig::adhoc(templates, execution)
        }
        (None, Some(id)) => {
            let collection = rt
                .service
                .engine()
                .store()
                .collection(id)
                .await
                .map_err(RunnerError::Store)?
                .ok_or_else(|| RunnerError::CollectionNotFound(id.clone()))?;
            RunConfig::for_collection(&collection)
        }
        (None, None) => return Err(CliError::command("a collection id or --file is required")),
    };

    let exec = &mut config.execution;
    if let Some(mode) = args.mode {
        exec.mode = mode.into();
    }
    if let Some(delay) = args.delay_ms {
        exec.inter_request_delay_ms = delay;
    }
    if !args.headers.is_empty() {
        let extra = parse_header_text(&args.headers.join("\n"));
        exec.header_overrides =
            TemplateHeaders(merge_headers(exec.header_overrides.as_slice(), &extra));
    }
    exec.use_variable_substitution |= args.substitute;
    exec.validate_status_range |= args.validate_status;
    if args.no_redirects {
        exec.follow_redirects = false;
    }

    let monitor = Arc::new(ProgressMonitor::new(
        &config.templates,
        !json && atty::is(atty::Stream::Stderr),
    ));
    let sink = monitor.clone();
    let on_progress: ProgressFn = Arc::new(move |p: &RunProgress| sink.update(p));

    let execution = rt.service.engine().execute(config, Some(on_progress)).await?;
    monitor.finish(execution.status.as_str());

    if json {
        print_json(&execution)?;
    } else {
        print_text(&execution);
    }

    Ok(match execution.status {
        RunStatus::Completed if execution.failed == 0 => 0,
        RunStatus::Completed => 1,
        RunStatus::Cancelled => 130,
        RunStatus::Failed | RunStatus::Running => 50,
    })
}

fn print_text(execution: &RunExecution) {
    for r in &execution.results {
        let status = if r.status == 0 {
            "---".to_string()
        } else {
            r.status.to_string()
        };
        let mark = if r.success { "ok  " } else { "FAIL" };
        println!(
            "{mark} {:>3} {:>6}ms {} {}{}",
            status,
            r.duration_ms,
            r.method,
            r.url,
            r.error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    println!(
        "run {} {}: {}/{} succeeded, {} failed",
        execution.id, execution.status, execution.succeeded, execution.total, execution.failed
    );
}
