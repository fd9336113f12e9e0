//! wiretap core: capture correlation, replay execution and schedule
//! computation. Everything that touches the network, the filesystem or the
//! terminal lives behind the traits exported here and is implemented in
//! `wiretap-plugins`.

pub mod capture;
pub mod config;
pub mod error;
pub mod ops;
pub mod persist;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod util;

pub use capture::{CaptureEngine, CapturedTransaction, LifecycleEvent, TelemetrySample};
pub use config::AppConfig;
pub use error::{RunnerError, TransportError};
pub use ops::{OperationOutput, RunnerOperation, RunnerService};
pub use persist::{PersistQueue, Record, RecordSink};
pub use runner::{RunExecution, RunnerCollection, RunnerEngine};
pub use schedule::{ScheduleSpec, ScheduledRun, Scheduler};
pub use store::CollectionStore;
