//! Replay execution: one template at a time through a [`ReplayTransport`],
//! batches sequentially or in parallel through the [`RunnerEngine`].

mod engine;
pub mod headers;
mod model;
mod replay;
mod transport;
pub mod variables;

pub use engine::{ProgressFn, RunConfig, RunProgress, RunnerEngine};
pub use model::{
    ExecutionConfig, ExecutionMode, ReplayOutcome, ReplayTemplate, RunExecution, RunStatus,
    RunnerCollection, TemplateHeaders,
};
pub use replay::{replay_one, MANAGED_HEADERS};
pub use transport::{PreparedRequest, ReplayTransport, TransportResponse};
pub use variables::{StaticVariables, VariableSource};
