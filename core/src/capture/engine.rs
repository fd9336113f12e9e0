use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::context::ContextResolver;
use super::correlate::match_sample;
use super::filter::{Admission, FilterEvaluator};
use super::model::{
    find_header, CaptureMessage, CapturedTransaction, Header, HeaderDirection, LifecycleEvent,
    LifecyclePhase, LifecycleState, TelemetrySample, TransactionOutcome, UNKNOWN_DOMAIN,
};
use super::store::{CorrelationStore, Finish, PendingEntry};
use crate::config::{CaptureConfig, FilterConfig};
use crate::persist::{PersistQueue, Record};
use crate::util::host_of;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub started: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub handed_off: u64,
    pub expired: u64,
    pub late_events_ignored: u64,
    pub samples_merged: u64,
    pub samples_backfilled: u64,
    pub samples_discarded: u64,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    handed_off: AtomicU64,
    expired: AtomicU64,
    late_events_ignored: AtomicU64,
    samples_merged: AtomicU64,
    samples_backfilled: AtomicU64,
    samples_discarded: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub samples_backfilled: usize,
    pub samples_discarded: usize,
    pub tombstones_expired: usize,
}

/// Reconciles lifecycle events and telemetry samples into finished
/// [`CapturedTransaction`] records.
///
/// Every handler runs to completion against the correlation store under one
/// mutex and never awaits I/O: context resolution is spawned and re-enters
/// through [`CaptureEngine::on_context_resolved`], and finished records are
/// handed to the [`PersistQueue`] without waiting for the sink.
#[derive(Clone)]
pub struct CaptureEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Mutex<CorrelationStore>,
    filter: RwLock<FilterEvaluator>,
    cfg: CaptureConfig,
    resolver: Arc<dyn ContextResolver>,
    persist: PersistQueue,
    counters: Counters,
}

impl CaptureEngine {
    pub fn new(
        cfg: &CaptureConfig,
        filter: &FilterConfig,
        resolver: Arc<dyn ContextResolver>,
        persist: PersistQueue,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(CorrelationStore::new(cfg.rejected_capacity)),
                filter: RwLock::new(FilterEvaluator::new(filter)),
                cfg: cfg.clone(),
                resolver,
                persist,
                counters: Counters::default(),
            }),
        }
    }

    fn store(&self) -> MutexGuard<'_, CorrelationStore> {
        self.inner.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timeout(&self) -> Duration {
        Duration::milliseconds(self.inner.cfg.entry_timeout_ms as i64)
    }

    fn tolerance(&self) -> Duration {
        Duration::milliseconds(self.inner.cfg.telemetry_tolerance_ms as i64)
    }

    fn admit(&self, resource_type: &str, domain: &str) -> Admission {
        self.inner
            .filter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .evaluate(resource_type, domain)
    }

    /// Swaps the admission rules. Records already admitted or rejected keep
    /// their decision.
    pub fn update_filter(&self, cfg: &FilterConfig) {
        let mut filter = self.inner.filter.write().unwrap_or_else(|e| e.into_inner());
        *filter = FilterEvaluator::new(cfg);
    }

    pub fn ingest(&self, msg: CaptureMessage) {
        match msg {
            CaptureMessage::Lifecycle(event) => self.handle_lifecycle(event),
            CaptureMessage::Telemetry(sample) => self.on_telemetry_sample(sample),
        }
    }

    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        match event.phase {
            LifecyclePhase::Start => self.on_transaction_start(&event),
            LifecyclePhase::HeadersSent => {
                let headers = event.headers.unwrap_or_default();
                self.on_headers(&event.id, headers, HeaderDirection::Request);
            }
            LifecyclePhase::HeadersReceived => {
                let headers = event.headers.unwrap_or_default();
                self.on_headers(&event.id, headers, HeaderDirection::Response);
            }
            LifecyclePhase::Completed => self.on_transaction_end(
                &event.id,
                TransactionOutcome {
                    status: event.status,
                    ended_at: event.timestamp,
                },
            ),
            LifecyclePhase::Errored => {
                let error = event.error.unwrap_or_else(|| "unknown error".to_string());
                self.on_transaction_error(&event.id, error, event.timestamp);
            }
        }
    }

    /// Stores the record synchronously, then dispatches context resolution.
    pub fn on_transaction_start(&self, event: &LifecycleEvent) {
        let tab_id = event.tab_id.filter(|t| *t >= 0);
        {
            let mut store = self.store();
            if store.is_rejected(&event.id) || store.contains(&event.id) {
                bump(&self.inner.counters.late_events_ignored);
                tracing::debug!(
                    target: "wiretap.capture",
                    stage = "capture.start.duplicate",
                    id = %event.id
                );
                return;
            }

            let mut tx = CapturedTransaction::new(
                event.id.clone(),
                event.url.clone(),
                event.method.clone(),
                event.resource_type.clone(),
                tab_id,
                event.timestamp,
            );
            if let Some(headers) = &event.headers {
                tx.request_headers = headers.clone();
            }
            let _ = tx.advance(LifecycleState::ContextPending);

            let mut entry = PendingEntry::new(tx);
            entry.headers_seen = event.headers.is_some();
            if let Some(sample) =
                store.adopt_parked(&event.id, &event.url, event.timestamp, self.tolerance())
            {
                merge_sample(&mut entry, &sample);
                bump(&self.inner.counters.samples_merged);
            }
            store.insert(entry);
        }
        bump(&self.inner.counters.started);
        tracing::debug!(
            target: "wiretap.capture",
            stage = "capture.start",
            id = %event.id,
            url = %event.url,
            tab_id = ?tab_id
        );

        match tab_id {
            Some(tab_id) => {
                let engine = self.clone();
                let id = event.id.clone();
                tokio::spawn(async move {
                    let page_url = match engine.inner.resolver.resolve_context(tab_id).await {
                        Ok(ctx) => Some(ctx.page_url),
                        Err(err) => {
                            tracing::debug!(
                                target: "wiretap.capture",
                                stage = "capture.context.fallback",
                                id = %id,
                                error = %err
                            );
                            None
                        }
                    };
                    engine.on_context_resolved(&id, page_url);
                });
            }
            None => {
                self.on_context_resolved(&event.id, None);
            }
        }
    }

    /// Sets the record's domain and runs admission. `None` means the owning
    /// page could not be resolved; the transaction's own host is used.
    ///
    /// Returns the record's state afterwards, or `None` when no record
    /// exists. A second resolution for the same id changes nothing.
    pub fn on_context_resolved(
        &self,
        id: &str,
        page_url: Option<String>,
    ) -> Option<LifecycleState> {
        let mut handoff = None;
        let state = {
            let mut store = self.store();
            if store.is_rejected(id) {
                return Some(LifecycleState::Rejected);
            }
            let entry = store.entry_mut(id)?;
            if entry.tx.lifecycle_state != LifecycleState::ContextPending {
                return Some(entry.tx.lifecycle_state);
            }

            let page_url = page_url.filter(|u| !u.trim().is_empty());
            let domain = page_url
                .as_deref()
                .and_then(host_of)
                .or_else(|| host_of(&entry.tx.url))
                .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string());
            entry.tx.origin_page_url = page_url;
            entry.tx.domain = Some(domain.clone());

            match self.admit(&entry.tx.resource_type, &domain) {
                Admission::Reject(reason) => {
                    let _ = entry.tx.advance(LifecycleState::Rejected);
                    let started_at = entry.tx.started_at;
                    store.remove(id);
                    store.mark_rejected(id, started_at);
                    bump(&self.inner.counters.rejected);
                    tracing::debug!(
                        target: "wiretap.capture",
                        stage = "capture.rejected",
                        id = %id,
                        domain = %domain,
                        reason = ?reason
                    );
                    LifecycleState::Rejected
                }
                Admission::Admit => {
                    let _ = entry.tx.advance(LifecycleState::Admitted);
                    if entry.headers_seen {
                        let _ = entry.tx.advance(LifecycleState::HeadersMerged);
                    }
                    bump(&self.inner.counters.admitted);
                    match entry.deferred.take() {
                        Some(finish) => {
                            let entry = store.take_finished(id)?;
                            let record = finalize(entry, finish);
                            let state = record
                                .outcome_state()
                                .unwrap_or(LifecycleState::HandedOff);
                            handoff = Some(record);
                            state
                        }
                        None => entry.tx.lifecycle_state,
                    }
                }
            }
        };

        if let Some(record) = handoff {
            self.hand_off(record);
        }
        Some(state)
    }

    /// Attaches headers to a live record. Unknown ids are a no-op.
    pub fn on_headers(&self, id: &str, headers: Vec<Header>, direction: HeaderDirection) {
        let mut store = self.store();
        let Some(entry) = store.entry_mut(id) else {
            bump(&self.inner.counters.late_events_ignored);
            return;
        };

        match direction {
            HeaderDirection::Request => entry.tx.request_headers = headers,
            HeaderDirection::Response => {
                if let Some(size) = find_header(&headers, "content-length")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                {
                    entry.tx.size_bytes = Some(size);
                }
                entry.tx.response_headers = headers;
            }
        }
        entry.headers_seen = true;
        if entry.tx.lifecycle_state == LifecycleState::Admitted {
            let _ = entry.tx.advance(LifecycleState::HeadersMerged);
        }
    }

    /// Pairs a sample with a record: by id when the channel supplies one,
    /// else through [`match_sample`]. A sample carrying an id is never
    /// matched by url. Unmatched samples are parked until a matching start
    /// arrives or the grace window passes.
    pub fn on_telemetry_sample(&self, sample: TelemetrySample) {
        let mut store = self.store();

        if let Some(tid) = sample.transaction_id.as_deref() {
            if store.is_rejected(tid) || store.is_finished(tid) {
                bump(&self.inner.counters.late_events_ignored);
                return;
            }
            if let Some(entry) = store.entry_mut(tid) {
                merge_sample(entry, &sample);
                bump(&self.inner.counters.samples_merged);
                return;
            }
            tracing::trace!(
                target: "wiretap.capture",
                stage = "capture.telemetry.parked",
                id = %tid
            );
            store.park(sample);
            return;
        }

        let matched =
            match_sample(&sample, store.candidates(), self.tolerance()).map(str::to_string);
        if let Some(id) = matched {
            if let Some(entry) = store.entry_mut(&id) {
                merge_sample(entry, &sample);
                bump(&self.inner.counters.samples_merged);
                return;
            }
        }

        tracing::trace!(
            target: "wiretap.capture",
            stage = "capture.telemetry.parked",
            url = %sample.url
        );
        store.park(sample);
    }

    pub fn on_transaction_end(&self, id: &str, outcome: TransactionOutcome) {
        self.finish(id, Finish::Completed(outcome));
    }

    pub fn on_transaction_error(&self, id: &str, error: impl Into<String>, at: DateTime<Utc>) {
        self.finish(
            id,
            Finish::Errored {
                error: error.into(),
                at,
            },
        );
    }

    fn finish(&self, id: &str, finish: Finish) {
        let record = {
            let mut store = self.store();
            let Some(entry) = store.entry_mut(id) else {
                bump(&self.inner.counters.late_events_ignored);
                return;
            };
            match entry.tx.lifecycle_state {
                LifecycleState::Admitted | LifecycleState::HeadersMerged => {}
                _ => {
                    // Not admitted yet: applied once the filter has run.
                    entry.deferred = Some(finish);
                    return;
                }
            }
            match store.take_finished(id) {
                Some(entry) => finalize(entry, finish),
                None => return,
            }
        };
        self.hand_off(record);
    }

    fn hand_off(&self, record: CapturedTransaction) {
        bump(&self.inner.counters.handed_off);
        tracing::debug!(
            target: "wiretap.capture",
            stage = "capture.handoff",
            id = %record.id,
            status = ?record.status,
            domain = ?record.domain
        );
        self.inner.persist.submit(Record::Transaction(record));
    }

    pub fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(Utc::now())
    }

    /// Drops records older than the entry timeout regardless of state,
    /// resolves parked samples past their grace window and forgets old
    /// rejection tombstones.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        let grace = Duration::milliseconds(self.inner.cfg.telemetry_grace_ms as i64);
        let mut report = SweepReport::default();
        let mut backfilled = Vec::new();
        {
            let mut store = self.store();
            let expired = store.expire(now, self.timeout());
            report.expired = expired.into_iter().map(|tx| tx.id).collect();
            report.tombstones_expired = store.expire_rejected(now, self.timeout());

            for sample in store.expire_parked(now, grace) {
                match self.backfill(&store, sample) {
                    Some(record) => backfilled.push(record),
                    None => report.samples_discarded += 1,
                }
            }
        }
        report.samples_backfilled = backfilled.len();

        let counters = &self.inner.counters;
        counters
            .expired
            .fetch_add(report.expired.len() as u64, Ordering::Relaxed);
        counters
            .samples_backfilled
            .fetch_add(report.samples_backfilled as u64, Ordering::Relaxed);
        counters
            .samples_discarded
            .fetch_add(report.samples_discarded as u64, Ordering::Relaxed);

        if !report.expired.is_empty() {
            tracing::info!(
                target: "wiretap.capture",
                stage = "capture.sweep",
                expired = report.expired.len(),
                backfilled = report.samples_backfilled,
                discarded = report.samples_discarded
            );
        }

        for record in backfilled {
            self.hand_off(record);
        }
        report
    }

    /// Builds a minimal record from a sample no lifecycle event ever
    /// claimed, when policy allows it and the filter admits it.
    fn backfill(
        &self,
        store: &CorrelationStore,
        sample: TelemetrySample,
    ) -> Option<CapturedTransaction> {
        if !self.inner.cfg.backfill_unmatched_samples {
            return None;
        }
        let id = sample
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("telemetry-{}", Uuid::new_v4()));
        if store.is_rejected(&id) || store.is_finished(&id) || store.contains(&id) {
            return None;
        }

        let domain = host_of(&sample.url).unwrap_or_else(|| UNKNOWN_DOMAIN.to_string());
        let mut tx = CapturedTransaction::new(
            id,
            sample.url.clone(),
            "UNKNOWN",
            "other",
            None,
            sample.observed_at,
        );
        let _ = tx.advance(LifecycleState::ContextPending);
        tx.domain = Some(domain.clone());
        if !self.admit(&tx.resource_type, &domain).is_admit() {
            return None;
        }
        let _ = tx.advance(LifecycleState::Admitted);

        let mut entry = PendingEntry::new(tx);
        merge_sample(&mut entry, &sample);
        let ended_at = entry.tx.started_at
            + entry
                .tx
                .timing
                .total_ms
                .map(|ms| Duration::milliseconds(ms as i64))
                .unwrap_or_else(Duration::zero);
        Some(finalize(
            entry,
            Finish::Completed(TransactionOutcome {
                status: None,
                ended_at,
            }),
        ))
    }

    /// Runs [`CaptureEngine::sweep_expired`] on a fixed period until the
    /// returned handle is aborted.
    pub fn spawn_sweeper(&self, period: StdDuration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.sweep_expired();
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.store().len()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.store().ids()
    }

    pub fn snapshot(&self, id: &str) -> Option<CapturedTransaction> {
        self.store().get(id).cloned()
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.store().is_rejected(id)
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.inner.counters;
        CaptureStats {
            started: c.started.load(Ordering::Relaxed),
            admitted: c.admitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            handed_off: c.handed_off.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            late_events_ignored: c.late_events_ignored.load(Ordering::Relaxed),
            samples_merged: c.samples_merged.load(Ordering::Relaxed),
            samples_backfilled: c.samples_backfilled.load(Ordering::Relaxed),
            samples_discarded: c.samples_discarded.load(Ordering::Relaxed),
        }
    }

    /// Waits until every record handed off so far reached the sink.
    pub async fn flush(&self) {
        self.inner.persist.flush().await;
    }
}

fn merge_sample(entry: &mut PendingEntry, sample: &TelemetrySample) {
    entry.tx.timing.merge_from(&sample.duration_breakdown);
    if entry.tx.size_bytes.is_none() {
        entry.tx.size_bytes = sample.size_bytes;
    }
    entry.has_telemetry = true;
}

fn finalize(entry: PendingEntry, finish: Finish) -> CapturedTransaction {
    let mut tx = entry.tx;
    let terminal = match finish {
        Finish::Completed(outcome) => {
            tx.status = outcome.status;
            tx.ended_at = Some(outcome.ended_at);
            LifecycleState::Completed
        }
        Finish::Errored { error, at } => {
            tx.error = Some(error);
            tx.ended_at = Some(at);
            LifecycleState::Errored
        }
    };
    if tx.timing.total_ms.is_none() {
        tx.timing.total_ms = tx.duration_ms().map(|ms| ms.max(0) as f64);
    }
    let _ = tx.advance(terminal);
    let _ = tx.advance(LifecycleState::HandedOff);
    tx
}
