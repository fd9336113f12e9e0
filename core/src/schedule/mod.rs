//! Schedule computation and due-polling. The scheduler owns no timers; a
//! driver calls [`Scheduler::run_due`] periodically.

mod compute;
mod model;
mod scheduler;

pub use compute::{compute_next_run, parse_time_of_day};
pub use model::{ScheduleKind, ScheduleSpec, ScheduledRun};
pub use scheduler::{DueRun, Scheduler};
