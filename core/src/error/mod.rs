#[allow(clippy::module_inception)]
pub mod error;
pub mod transport;

pub use error::{ContextError, RunnerError};
pub use transport::{TransportError, TransportErrorKind};
