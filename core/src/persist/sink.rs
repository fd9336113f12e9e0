use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::CapturedTransaction;
use crate::runner::RunExecution;

/// A finished record handed to the downstream store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Transaction(CapturedTransaction),
    RunExecution(RunExecution),
}

impl Record {
    pub fn id(&self) -> &str {
        match self {
            Self::Transaction(t) => &t.id,
            Self::RunExecution(r) => &r.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::RunExecution(_) => "run_execution",
        }
    }
}

/// Write side of the downstream store. Delivery is at-least-once; the store
/// deduplicates by record id.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;
    async fn persist(&self, record: &Record) -> anyhow::Result<()>;
}

/// Keeps every record in memory. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn transactions(&self) -> Vec<CapturedTransaction> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Transaction(t) => Some(t),
                Record::RunExecution(_) => None,
            })
            .collect()
    }

    pub fn runs(&self) -> Vec<RunExecution> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::RunExecution(r) => Some(r),
                Record::Transaction(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn persist(&self, record: &Record) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
