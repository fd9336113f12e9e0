mod queue;
mod sink;

pub use queue::{PersistQueue, PersistStats};
pub use sink::{MemorySink, Record, RecordSink};
