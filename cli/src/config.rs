use std::path::{Path, PathBuf};

use wiretap_core::AppConfig;

use crate::error::CliError;

/// `~/.wiretap`
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".wiretap"))
}

fn read(path: &Path) -> Result<AppConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    toml::from_str::<AppConfig>(&text)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))
}

/// Resolves the config file in priority order: `explicit`, then
/// `~/.wiretap/config.toml`, then `./wiretap.toml`, else defaults. `WIRETAP_*`
/// variables are applied last.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, CliError> {
    let mut cfg = match explicit {
        Some(path) => read(path)?,
        None => {
            let home_cfg = data_dir().map(|d| d.join("config.toml"));
            let local_cfg = Path::new("wiretap.toml");
            match home_cfg.filter(|p| p.exists()) {
                Some(path) => read(&path)?,
                None if local_cfg.exists() => read(local_cfg)?,
                None => AppConfig::default(),
            }
        }
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("WIRETAP_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = get("WIRETAP_OUTPUT") {
        cfg.persist.path = v;
    }
    if let Some(v) = get("WIRETAP_STORE") {
        cfg.runner.store_path = v;
    }
    if let Some(v) = get("WIRETAP_UTC_OFFSET_MINUTES") {
        match v.trim().parse::<i32>() {
            Ok(minutes) => cfg.scheduler.utc_offset_minutes = minutes,
            Err(_) => tracing::warn!(
                target: "wiretap.schedule",
                stage = "config.env_ignored",
                key = "WIRETAP_UTC_OFFSET_MINUTES",
                value = %v
            ),
        }
    }
}
