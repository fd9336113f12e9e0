mod jsonl;

pub use jsonl::JsonlRecordSink;
