use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::sink::{Record, RecordSink};
use crate::config::PersistConfig;

enum PersistMsg {
    Record(Record),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub persisted: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Fire-and-forget hand-off to a [`RecordSink`].
///
/// Records go through a bounded channel drained by one writer task, so event
/// handlers never wait on storage. Sink failures are logged and the record
/// is dropped; nothing is retried.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistMsg>,
    counters: Arc<Counters>,
    drop_when_full: bool,
}

impl PersistQueue {
    /// Spawns the writer task. Must be called from within a tokio runtime.
    pub fn start(sink: Arc<dyn RecordSink>, cfg: &PersistConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<PersistMsg>(cfg.channel_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let writer_counters = counters.clone();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    PersistMsg::Record(record) => match sink.persist(&record).await {
                        Ok(()) => {
                            writer_counters.persisted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            writer_counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                target: "wiretap.persist",
                                stage = "persist.failed",
                                sink = sink.name(),
                                kind = record.kind(),
                                id = %record.id(),
                                error = %err
                            );
                        }
                    },
                    PersistMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            tx,
            counters,
            drop_when_full: cfg.drop_when_full,
        }
    }

    /// Non-blocking submit for synchronous callers.
    pub fn submit(&self, record: Record) {
        match self.tx.try_send(PersistMsg::Record(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                if self.drop_when_full {
                    self.record_drop(&msg);
                } else {
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(msg).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => self.record_drop(&msg),
        }
    }

    pub async fn enqueue(&self, record: Record) {
        if self.drop_when_full {
            self.submit(record);
        } else if let Err(err) = self.tx.send(PersistMsg::Record(record)).await {
            self.record_drop(&err.0);
        }
    }

    /// Resolves once every record submitted before the call reached the sink.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMsg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn record_drop(&self, msg: &PersistMsg) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        if let PersistMsg::Record(record) = msg {
            tracing::warn!(
                target: "wiretap.persist",
                stage = "persist.dropped",
                kind = record.kind(),
                id = %record.id()
            );
        }
    }
}
