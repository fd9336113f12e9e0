use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Interval,
    Daily,
    Weekly,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Once => "once",
            Self::Interval => "interval",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        })
    }
}

/// When a collection should run.
///
/// `time` is `HH:MM` in the scheduler's configured offset. Weekdays are
/// numbered from Sunday = 0 to Saturday = 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Once {
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Interval {
        minutes: u32,
    },
    Daily {
        time: String,
    },
    Weekly {
        time: String,
        days_of_week: Vec<u8>,
    },
}

impl ScheduleSpec {
    pub fn kind(&self) -> ScheduleKind {
        match self {
            Self::Once { .. } => ScheduleKind::Once,
            Self::Interval { .. } => ScheduleKind::Interval,
            Self::Daily { .. } => ScheduleKind::Daily,
            Self::Weekly { .. } => ScheduleKind::Weekly,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::Once { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRun {
    pub id: String,
    pub collection_id: String,
    pub spec: ScheduleSpec,
    pub next_run_at: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl ScheduledRun {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }
}
