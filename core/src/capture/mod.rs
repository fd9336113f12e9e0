//! Capture & correlation: lifecycle events and telemetry samples in,
//! finished transaction records out.

pub mod context;
pub mod correlate;
pub mod engine;
pub mod filter;
pub mod model;
pub mod store;
pub mod transitions;

pub use context::{ContextResolver, NoContext, PageContext};
pub use engine::{CaptureEngine, CaptureStats, SweepReport};
pub use filter::{Admission, FilterEvaluator, RejectReason};
pub use model::{
    find_header, CaptureMessage, CapturedTransaction, Header, HeaderDirection, LifecycleEvent,
    LifecyclePhase, LifecycleState, TelemetrySample, TimingBreakdown, TransactionOutcome,
};
pub use store::CorrelationStore;
pub use transitions::{StateTransition, TransitionError};
