use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub persist: PersistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "wiretap_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Pending records older than this are evicted by the sweeper.
    #[serde(default = "default_entry_timeout_ms")]
    pub entry_timeout_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Max distance between a sample's start and a record's start for the
    /// url + time heuristic to pair them.
    #[serde(default = "default_telemetry_tolerance_ms")]
    pub telemetry_tolerance_ms: u64,

    /// How long an unmatched sample waits for a lifecycle start.
    #[serde(default = "default_telemetry_grace_ms")]
    pub telemetry_grace_ms: u64,

    #[serde(default)]
    pub backfill_unmatched_samples: bool,

    #[serde(default = "default_rejected_capacity")]
    pub rejected_capacity: usize,
}

fn default_entry_timeout_ms() -> u64 {
    60_000
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

fn default_telemetry_tolerance_ms() -> u64 {
    2_000
}

fn default_telemetry_grace_ms() -> u64 {
    10_000
}

fn default_rejected_capacity() -> usize {
    4_096
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            entry_timeout_ms: default_entry_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            telemetry_tolerance_ms: default_telemetry_tolerance_ms(),
            telemetry_grace_ms: default_telemetry_grace_ms(),
            backfill_unmatched_samples: false,
            rejected_capacity: default_rejected_capacity(),
        }
    }
}

/// Admission rules. See `capture::filter` for precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub include_types: Vec<String>,
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
    #[serde(default)]
    pub track_only_configured_sites: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Enforced by the transport, not by the runner engine.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// JSON document holding collections and schedules.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Values for `${NAME}` placeholders when a collection enables
    /// substitution.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_history_capacity() -> usize {
    50
}

fn default_store_path() -> String {
    "./wiretap.collections.json".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            history_capacity: default_history_capacity(),
            store_path: default_store_path(),
            variables: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fixed offset used to interpret daily/weekly times of day.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub drop_when_full: bool,

    /// JSONL output for finished records; "stdout:" writes to stdout.
    #[serde(default = "default_output_path")]
    pub path: String,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_output_path() -> String {
    "./wiretap.records.jsonl".to_string()
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            drop_when_full: false,
            path: default_output_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.capture.entry_timeout_ms, 60_000);
        assert_eq!(cfg.runner.history_capacity, 50);
        assert!(!cfg.filter.track_only_configured_sites);
        assert_eq!(cfg.scheduler.utc_offset_minutes, 0);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"capture":{"backfill_unmatched_samples":true}}"#).unwrap();
        assert!(cfg.capture.backfill_unmatched_samples);
        assert_eq!(cfg.capture.telemetry_tolerance_ms, 2_000);
    }
}
