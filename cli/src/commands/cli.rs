use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use wiretap_core::runner::ExecutionMode;
use wiretap_core::schedule::ScheduleSpec;

use crate::error::CliError;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Sequential,
    Parallel,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::Parallel => ExecutionMode::Parallel,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "wiretap", version, about = "Capture, replay and schedule HTTP traffic")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to ~/.wiretap/config.toml, then ./wiretap.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CaptureArgs {
    /// JSONL stream of lifecycle and telemetry messages; `-` reads stdin as a
    /// live feed. A file is replayed on its own timestamps.
    #[arg(long, default_value = "-")]
    pub input: String,

    /// Turn unmatched telemetry samples into minimal records.
    #[arg(long)]
    pub backfill: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Stored collection to execute.
    #[arg(required_unless_present = "file")]
    pub collection_id: Option<String>,

    /// Ad hoc templates: a JSON array, or `{templates, execution_config}`.
    #[arg(long, conflicts_with = "collection_id")]
    pub file: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Header override `Name: Value`. Can be given multiple times.
    #[arg(long = "header", action = clap::ArgAction::Append)]
    pub headers: Vec<String>,

    #[arg(long)]
    pub substitute: bool,

    #[arg(long)]
    pub validate_status: bool,

    #[arg(long)]
    pub no_redirects: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ScheduleAddArgs {
    pub collection_id: String,

    /// Run once, at `--at` (RFC 3339) or immediately.
    #[arg(long, group = "when")]
    pub once: bool,

    #[arg(long, requires = "once")]
    pub at: Option<String>,

    /// Run every N minutes.
    #[arg(long, group = "when")]
    pub every: Option<u32>,

    /// Run daily at HH:MM.
    #[arg(long, group = "when")]
    pub daily: Option<String>,

    /// Run weekly at HH:MM on `--days`.
    #[arg(long, group = "when", requires = "days")]
    pub weekly: Option<String>,

    /// Weekdays, 0 = Sunday .. 6 = Saturday, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub days: Vec<u8>,
}

impl ScheduleAddArgs {
    pub fn to_spec(&self) -> Result<ScheduleSpec, CliError> {
        if self.once {
            let at = match &self.at {
                Some(text) => Some(
                    chrono::DateTime::parse_from_rfc3339(text)
                        .map_err(|e| CliError::command(format!("invalid --at `{text}`: {e}")))?
                        .with_timezone(&chrono::Utc),
                ),
                None => None,
            };
            return Ok(ScheduleSpec::Once { at });
        }
        if let Some(minutes) = self.every {
            return Ok(ScheduleSpec::Interval { minutes });
        }
        if let Some(time) = &self.daily {
            return Ok(ScheduleSpec::Daily { time: time.clone() });
        }
        if let Some(time) = &self.weekly {
            return Ok(ScheduleSpec::Weekly {
                time: time.clone(),
                days_of_week: self.days.clone(),
            });
        }
        Err(CliError::command(
            "one of --once, --every, --daily or --weekly is required",
        ))
    }
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    Add(ScheduleAddArgs),
    List,
    Enable { schedule_id: String },
    Disable { schedule_id: String },
    Remove { schedule_id: String },
    /// Execute every due schedule once and exit.
    Poll,
    /// Poll on an interval until interrupted.
    Daemon {
        #[arg(long)]
        poll_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CollectionsCommand {
    List,
    Show {
        collection_id: String,
    },
    Create {
        #[arg(long)]
        name: String,
        /// Templates file, same format as `run --file`.
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    Delete {
        collection_id: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OpArgs {
    /// Operation as JSON, e.g. `{"op":"list_collections"}`. Reads stdin when
    /// omitted.
    pub request: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Capture(CaptureArgs),
    Run(RunArgs),
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    Collections {
        #[command(subcommand)]
        command: CollectionsCommand,
    },
    /// Dispatch one runner operation given as JSON.
    Op(OpArgs),
}
