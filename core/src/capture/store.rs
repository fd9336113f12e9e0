use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use super::correlate::{comparable_url, Candidate};
use super::model::{CapturedTransaction, TelemetrySample, TransactionOutcome};
use super::transitions::StateTransition;

/// A terminal event that arrived before the record was admitted. Applied on
/// admission, dropped with the record on rejection.
#[derive(Debug, Clone)]
pub(crate) enum Finish {
    Completed(TransactionOutcome),
    Errored { error: String, at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub(crate) struct PendingEntry {
    pub tx: CapturedTransaction,
    pub deferred: Option<Finish>,
    pub headers_seen: bool,
    pub has_telemetry: bool,
}

impl PendingEntry {
    pub fn new(tx: CapturedTransaction) -> Self {
        Self {
            tx,
            deferred: None,
            headers_seen: false,
            has_telemetry: false,
        }
    }
}

/// In-flight transactions keyed by id, plus the side tables the engine
/// needs: tombstones for rejected and for handed-off ids, so late events
/// cannot resurrect them or leak into another record, and samples still
/// waiting for their lifecycle start.
///
/// Not synchronized itself; the engine keeps it behind one mutex.
pub struct CorrelationStore {
    entries: HashMap<String, PendingEntry>,
    rejected: LruCache<String, DateTime<Utc>>,
    finished: LruCache<String, DateTime<Utc>>,
    parked: VecDeque<TelemetrySample>,
}

impl CorrelationStore {
    pub fn new(rejected_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(rejected_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: HashMap::new(),
            rejected: LruCache::new(cap),
            finished: LruCache::new(cap),
            parked: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CapturedTransaction> {
        self.entries.get(id).map(|e| &e.tx)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.rejected.contains(id)
    }

    /// Handed off within the tombstone window.
    pub fn is_finished(&self, id: &str) -> bool {
        self.finished.contains(id)
    }

    pub(crate) fn insert(&mut self, entry: PendingEntry) {
        self.entries.insert(entry.tx.id.clone(), entry);
    }

    pub(crate) fn entry_mut(&mut self, id: &str) -> Option<&mut PendingEntry> {
        self.entries.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<PendingEntry> {
        self.entries.remove(id)
    }

    /// Removes a record that is about to be handed off and remembers its id.
    pub(crate) fn take_finished(&mut self, id: &str) -> Option<PendingEntry> {
        let entry = self.entries.remove(id)?;
        self.finished.put(id.to_string(), entry.tx.started_at);
        Some(entry)
    }

    pub(crate) fn mark_rejected(&mut self, id: &str, at: DateTime<Utc>) {
        self.rejected.put(id.to_string(), at);
    }

    /// Live records eligible for telemetry pairing.
    pub(crate) fn candidates(&self) -> impl Iterator<Item = Candidate<'_>> {
        self.entries
            .values()
            .filter(|e| StateTransition::is_live(e.tx.lifecycle_state))
            .map(|e| Candidate {
                id: e.tx.id.as_str(),
                url: e.tx.url.as_str(),
                started_at: e.tx.started_at,
                has_telemetry: e.has_telemetry,
            })
    }

    pub(crate) fn park(&mut self, sample: TelemetrySample) {
        self.parked.push_back(sample);
    }

    /// Takes the parked sample that belongs to a freshly started record:
    /// same transaction id, or failing that the nearest same-url sample
    /// within `tolerance`.
    pub(crate) fn adopt_parked(
        &mut self,
        id: &str,
        url: &str,
        started_at: DateTime<Utc>,
        tolerance: Duration,
    ) -> Option<TelemetrySample> {
        if let Some(idx) = self
            .parked
            .iter()
            .position(|s| s.transaction_id.as_deref() == Some(id))
        {
            return self.parked.remove(idx);
        }

        let wanted = comparable_url(url);
        let idx = self
            .parked
            .iter()
            .enumerate()
            .filter(|(_, s)| s.transaction_id.is_none() && comparable_url(&s.url) == wanted)
            .filter_map(|(idx, s)| {
                let delta = s.observed_at - started_at;
                let distance = if delta < Duration::zero() { -delta } else { delta };
                (distance <= tolerance).then_some((distance, idx))
            })
            .min()
            .map(|(_, idx)| idx)?;
        self.parked.remove(idx)
    }

    /// Removes every record whose age exceeds `timeout`, whatever its state.
    pub fn expire(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<CapturedTransaction> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.tx.started_at > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| e.tx))
            .collect()
    }

    pub(crate) fn expire_parked(&mut self, now: DateTime<Utc>, grace: Duration) -> Vec<TelemetrySample> {
        let (stale, keep): (Vec<_>, Vec<_>) = self
            .parked
            .drain(..)
            .partition(|s| now - s.observed_at > grace);
        self.parked = keep.into();
        stale
    }

    /// Forgets rejection and hand-off tombstones older than `ttl`. Returns
    /// the number of rejection tombstones dropped.
    pub(crate) fn expire_rejected(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        expire_tombstones(&mut self.finished, now, ttl);
        expire_tombstones(&mut self.rejected, now, ttl)
    }
}

fn expire_tombstones(
    cache: &mut LruCache<String, DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> usize {
    let stale: Vec<String> = cache
        .iter()
        .filter(|(_, at)| now - **at > ttl)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        cache.pop(id);
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::model::TimingBreakdown;

    fn entry(id: &str, url: &str, started_at: DateTime<Utc>) -> PendingEntry {
        PendingEntry::new(CapturedTransaction::new(
            id, url, "GET", "fetch", Some(1), started_at,
        ))
    }

    fn parked(id: Option<&str>, url: &str, at: DateTime<Utc>) -> TelemetrySample {
        TelemetrySample {
            transaction_id: id.map(str::to_string),
            url: url.to_string(),
            observed_at: at,
            duration_breakdown: TimingBreakdown::default(),
            size_bytes: None,
        }
    }

    #[test]
    fn test_expire_removes_only_old_entries() {
        let now = Utc::now();
        let mut store = CorrelationStore::new(16);
        store.insert(entry("old", "https://a.test/", now - Duration::seconds(61)));
        store.insert(entry("edge", "https://a.test/", now - Duration::seconds(60)));
        store.insert(entry("young", "https://a.test/", now - Duration::seconds(5)));

        let expired = store.expire(now, Duration::seconds(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
        assert_eq!(store.ids(), vec!["edge".to_string(), "young".to_string()]);
    }

    #[test]
    fn test_adopt_parked_prefers_id_match() {
        let now = Utc::now();
        let mut store = CorrelationStore::new(16);
        store.park(parked(None, "https://a.test/x", now));
        store.park(parked(Some("r2"), "https://a.test/other", now));

        let by_id = store.adopt_parked("r2", "https://a.test/x", now, Duration::seconds(2));
        assert_eq!(by_id.and_then(|s| s.transaction_id), Some("r2".to_string()));

        let by_url = store.adopt_parked("r3", "https://a.test/x", now, Duration::seconds(2));
        assert!(by_url.is_some());
        assert_eq!(store.parked_len(), 0);
    }

    #[test]
    fn test_rejected_tombstones_expire() {
        let now = Utc::now();
        let mut store = CorrelationStore::new(2);
        store.mark_rejected("a", now - Duration::seconds(120));
        store.mark_rejected("b", now);
        assert_eq!(store.expire_rejected(now, Duration::seconds(60)), 1);
        assert!(!store.is_rejected("a"));
        assert!(store.is_rejected("b"));
    }

    #[test]
    fn test_take_finished_leaves_a_tombstone_until_expiry() {
        let now = Utc::now();
        let mut store = CorrelationStore::new(16);
        store.insert(entry("done", "https://a.test/", now - Duration::seconds(90)));
        assert!(store.take_finished("done").is_some());
        assert!(!store.contains("done"));
        assert!(store.is_finished("done"));

        store.expire_rejected(now, Duration::seconds(60));
        assert!(!store.is_finished("done"));
    }
}
