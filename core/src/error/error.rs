use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// Rejected before anything ran: empty batch, malformed schedule spec.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl RunnerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Owning page could not be resolved. Recovered locally with the
/// transaction's own host, never surfaced past the capture engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("no owning page for tab {0}")]
    NotFound(i64),
    #[error("context unavailable: {0}")]
    Unavailable(String),
}
