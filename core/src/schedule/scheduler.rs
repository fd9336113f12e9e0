use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::compute::{compute_next_run, parse_time_of_day};
use super::model::{ScheduleSpec, ScheduledRun};
use crate::config::SchedulerConfig;
use crate::error::RunnerError;
use crate::runner::{RunStatus, RunnerEngine};
use crate::store::CollectionStore;

/// One schedule fired by [`Scheduler::run_due`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueRun {
    pub schedule_id: String,
    pub collection_id: String,
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn CollectionStore>,
    runner: RunnerEngine,
    offset: FixedOffset,
}

impl Scheduler {
    pub fn new(store: Arc<dyn CollectionStore>, runner: RunnerEngine, cfg: &SchedulerConfig) -> Self {
        let offset = match FixedOffset::east_opt(cfg.utc_offset_minutes.saturating_mul(60)) {
            Some(offset) => offset,
            None => {
                tracing::warn!(
                    target: "wiretap.schedule",
                    stage = "schedule.offset_invalid",
                    utc_offset_minutes = cfg.utc_offset_minutes
                );
                Utc.fix()
            }
        };
        Self {
            store,
            runner,
            offset,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn validate(&self, spec: &ScheduleSpec) -> Result<(), RunnerError> {
        match spec {
            ScheduleSpec::Once { .. } => Ok(()),
            ScheduleSpec::Interval { minutes } => {
                if *minutes < 1 {
                    return Err(RunnerError::validation("interval must be at least 1 minute"));
                }
                Ok(())
            }
            ScheduleSpec::Daily { time } => parse_time_of_day(time).map(|_| ()),
            ScheduleSpec::Weekly { time, days_of_week } => {
                parse_time_of_day(time)?;
                if days_of_week.is_empty() {
                    return Err(RunnerError::validation("weekly schedule needs at least one weekday"));
                }
                if let Some(day) = days_of_week.iter().find(|d| **d > 6) {
                    return Err(RunnerError::validation(format!(
                        "weekday {day} out of range, want 0 (Sunday) to 6 (Saturday)"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn next_run(
        &self,
        spec: &ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RunnerError> {
        compute_next_run(spec, now, self.offset)
    }

    async fn load(&self, schedule_id: &str) -> Result<ScheduledRun, RunnerError> {
        self.store
            .schedule(schedule_id)
            .await?
            .ok_or_else(|| RunnerError::ScheduleNotFound(schedule_id.to_string()))
    }

    pub async fn schedule_collection(
        &self,
        collection_id: &str,
        spec: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRun, RunnerError> {
        self.validate(&spec)?;
        if self.store.collection(collection_id).await?.is_none() {
            return Err(RunnerError::CollectionNotFound(collection_id.to_string()));
        }

        let schedule = ScheduledRun {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            next_run_at: self.next_run(&spec, now)?,
            spec,
            enabled: true,
            last_run_at: None,
            last_status: None,
            created_at: now,
        };
        self.store.save_schedule(schedule.clone()).await?;
        tracing::info!(
            target: "wiretap.schedule",
            stage = "schedule.created",
            schedule_id = %schedule.id,
            collection_id = %collection_id,
            kind = %schedule.spec.kind(),
            next_run_at = %schedule.next_run_at
        );
        Ok(schedule)
    }

    /// Replaces the spec and recomputes `next_run_at` in the same step.
    pub async fn update_schedule(
        &self,
        schedule_id: &str,
        spec: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRun, RunnerError> {
        self.validate(&spec)?;
        let mut schedule = self.load(schedule_id).await?;
        schedule.next_run_at = self.next_run(&spec, now)?;
        schedule.spec = spec;
        self.store.save_schedule(schedule.clone()).await?;
        Ok(schedule)
    }

    pub async fn set_enabled(
        &self,
        schedule_id: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRun, RunnerError> {
        let mut schedule = self.load(schedule_id).await?;
        if enabled && !schedule.enabled {
            schedule.next_run_at = self.next_run(&schedule.spec, now)?;
        }
        schedule.enabled = enabled;
        self.store.save_schedule(schedule.clone()).await?;
        Ok(schedule)
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<bool, RunnerError> {
        Ok(self.store.delete_schedule(schedule_id).await?)
    }

    /// Removes every schedule pointing at `collection_id`.
    pub async fn delete_for_collection(&self, collection_id: &str) -> Result<usize, RunnerError> {
        let mut removed = 0;
        for schedule in self.store.list_schedules().await? {
            if schedule.collection_id == collection_id
                && self.store.delete_schedule(&schedule.id).await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<ScheduledRun>, RunnerError> {
        Ok(self.store.list_schedules().await?)
    }

    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledRun>, RunnerError> {
        let mut due: Vec<ScheduledRun> = self
            .store
            .list_schedules()
            .await?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        Ok(due)
    }

    /// Records a run. One-shot schedules are disabled with `next_run_at`
    /// left as it was; recurring ones move to their next slot.
    pub async fn mark_executed(
        &self,
        schedule_id: &str,
        status: RunStatus,
        now: DateTime<Utc>,
    ) -> Result<ScheduledRun, RunnerError> {
        let mut schedule = self.load(schedule_id).await?;
        schedule.last_run_at = Some(now);
        schedule.last_status = Some(status);

        if schedule.spec.is_recurring() {
            let next = self.next_run(&schedule.spec, now)?;
            debug_assert!(
                next > now,
                "scheduling inconsistency: next run {next} is not after {now}"
            );
            if next <= now {
                tracing::error!(
                    target: "wiretap.schedule",
                    stage = "schedule.inconsistent",
                    schedule_id = %schedule.id,
                    next_run_at = %next,
                    now = %now
                );
            }
            schedule.next_run_at = next;
        } else {
            schedule.enabled = false;
        }

        self.store.save_schedule(schedule.clone()).await?;
        tracing::debug!(
            target: "wiretap.schedule",
            stage = "schedule.executed",
            schedule_id = %schedule.id,
            status = %status,
            enabled = schedule.enabled,
            next_run_at = %schedule.next_run_at
        );
        Ok(schedule)
    }

    /// Executes every due schedule once, in due order.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<DueRun>, RunnerError> {
        let mut fired = Vec::new();
        for schedule in self.due_schedules(now).await? {
            tracing::info!(
                target: "wiretap.schedule",
                stage = "schedule.fire",
                schedule_id = %schedule.id,
                collection_id = %schedule.collection_id
            );
            let due = match self
                .runner
                .execute_collection(&schedule.collection_id, None)
                .await
            {
                Ok(run) => DueRun {
                    schedule_id: schedule.id.clone(),
                    collection_id: schedule.collection_id.clone(),
                    run_id: Some(run.id),
                    status: run.status,
                    error: None,
                },
                Err(err) => {
                    tracing::warn!(
                        target: "wiretap.schedule",
                        stage = "schedule.run_failed",
                        schedule_id = %schedule.id,
                        error = %err
                    );
                    DueRun {
                        schedule_id: schedule.id.clone(),
                        collection_id: schedule.collection_id.clone(),
                        run_id: None,
                        status: RunStatus::Failed,
                        error: Some(err.to_string()),
                    }
                }
            };
            self.mark_executed(&schedule.id, due.status, now).await?;
            fired.push(due);
        }
        Ok(fired)
    }

    /// Polls [`Self::run_due`] every `period`.
    pub fn spawn_driver(&self, period: StdDuration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = scheduler.run_due(Utc::now()).await {
                    tracing::error!(
                        target: "wiretap.schedule",
                        stage = "schedule.poll_failed",
                        error = %err
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistConfig, RunnerConfig};
    use crate::error::TransportError;
    use crate::persist::{MemorySink, PersistQueue};
    use crate::runner::{
        PreparedRequest, ReplayTemplate, ReplayTransport, RunnerCollection, StaticVariables,
        TransportResponse,
    };
    use crate::store::InMemoryCollectionStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Ok200;

    #[async_trait]
    impl ReplayTransport for Ok200 {
        fn name(&self) -> &str {
            "ok"
        }

        async fn send(&self, _request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 200,
                headers: Vec::new(),
            })
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn scheduler() -> (Scheduler, Arc<InMemoryCollectionStore>, RunnerCollection) {
        let store = Arc::new(InMemoryCollectionStore::new());
        let persist = PersistQueue::start(Arc::new(MemorySink::new()), &PersistConfig::default());
        let runner = RunnerEngine::new(
            Arc::new(Ok200),
            Arc::new(StaticVariables::default()),
            store.clone(),
            persist,
            &RunnerConfig::default(),
        );
        let collection = RunnerCollection::new("nightly", vec![ReplayTemplate::get("http://a.test/")]);
        store.save_collection(collection.clone()).await.unwrap();
        (
            Scheduler::new(store.clone(), runner, &SchedulerConfig::default()),
            store,
            collection,
        )
    }

    #[tokio::test]
    async fn test_validate_rejects_malformed_specs() {
        let (s, _, _) = scheduler().await;
        assert!(s.validate(&ScheduleSpec::Interval { minutes: 0 }).is_err());
        assert!(s
            .validate(&ScheduleSpec::Weekly {
                time: "09:00".to_string(),
                days_of_week: Vec::new(),
            })
            .is_err());
        assert!(s
            .validate(&ScheduleSpec::Weekly {
                time: "09:00".to_string(),
                days_of_week: vec![7],
            })
            .is_err());
        assert!(s
            .validate(&ScheduleSpec::Daily {
                time: "25:00".to_string()
            })
            .is_err());
        assert!(s.validate(&ScheduleSpec::Interval { minutes: 1 }).is_ok());
    }

    #[tokio::test]
    async fn test_schedule_requires_collection() {
        let (s, _, _) = scheduler().await;
        let err = s
            .schedule_collection("missing", ScheduleSpec::Interval { minutes: 5 }, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_executed_once_disables_and_keeps_next_run() {
        let (s, _, c) = scheduler().await;
        let now = ts("2024-03-05T10:00:00Z");
        let at = ts("2024-03-05T11:00:00Z");
        let once = s
            .schedule_collection(&c.id, ScheduleSpec::Once { at: Some(at) }, now)
            .await
            .unwrap();
        assert_eq!(once.next_run_at, at);

        let after = s
            .mark_executed(&once.id, RunStatus::Completed, ts("2024-03-05T11:00:05Z"))
            .await
            .unwrap();
        assert!(!after.enabled);
        assert_eq!(after.next_run_at, at);
        assert_eq!(after.last_status, Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_mark_executed_recurring_moves_forward() {
        let (s, _, c) = scheduler().await;
        let now = ts("2024-03-05T08:00:00Z");
        let daily = s
            .schedule_collection(
                &c.id,
                ScheduleSpec::Daily {
                    time: "09:00".to_string(),
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(daily.next_run_at, ts("2024-03-05T09:00:00Z"));

        let after = s
            .mark_executed(&daily.id, RunStatus::Failed, ts("2024-03-05T09:00:01Z"))
            .await
            .unwrap();
        assert!(after.enabled);
        assert_eq!(after.next_run_at, ts("2024-03-06T09:00:00Z"));
    }

    #[tokio::test]
    async fn test_run_due_fires_only_due_enabled() {
        let (s, store, c) = scheduler().await;
        let now = ts("2024-03-05T10:00:00Z");
        let due = s
            .schedule_collection(&c.id, ScheduleSpec::Once { at: None }, now)
            .await
            .unwrap();
        let later = s
            .schedule_collection(&c.id, ScheduleSpec::Interval { minutes: 30 }, now)
            .await
            .unwrap();
        let paused = s
            .schedule_collection(&c.id, ScheduleSpec::Once { at: None }, now)
            .await
            .unwrap();
        s.set_enabled(&paused.id, false, now).await.unwrap();

        let fired = s.run_due(now).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].schedule_id, due.id);
        assert_eq!(fired[0].status, RunStatus::Completed);
        assert!(s.due_schedules(now).await.unwrap().is_empty());

        let stored = store.collection(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert!(s.load(&later.id).await.unwrap().last_run_at.is_none());
    }

    #[tokio::test]
    async fn test_run_due_with_deleted_collection_records_failure() {
        let (s, store, c) = scheduler().await;
        let now = ts("2024-03-05T10:00:00Z");
        let sched = s
            .schedule_collection(&c.id, ScheduleSpec::Interval { minutes: 1 }, now)
            .await
            .unwrap();
        store.delete_collection(&c.id).await.unwrap();

        let fired = s.run_due(ts("2024-03-05T10:01:00Z")).await.unwrap();
        assert_eq!(fired[0].status, RunStatus::Failed);
        assert!(fired[0].run_id.is_none());
        let after = s.load(&sched.id).await.unwrap();
        assert_eq!(after.next_run_at, ts("2024-03-05T10:02:00Z"));
    }

    #[tokio::test]
    async fn test_reenable_recomputes_and_update_replaces_spec() {
        let (s, _, c) = scheduler().await;
        let t0 = ts("2024-03-05T10:00:00Z");
        let sched = s
            .schedule_collection(&c.id, ScheduleSpec::Interval { minutes: 10 }, t0)
            .await
            .unwrap();
        s.set_enabled(&sched.id, false, t0).await.unwrap();

        let t1 = ts("2024-03-05T12:00:00Z");
        let back = s.set_enabled(&sched.id, true, t1).await.unwrap();
        assert_eq!(back.next_run_at, ts("2024-03-05T12:10:00Z"));

        let updated = s
            .update_schedule(&sched.id, ScheduleSpec::Interval { minutes: 60 }, t1)
            .await
            .unwrap();
        assert_eq!(updated.next_run_at, ts("2024-03-05T13:00:00Z"));

        assert_eq!(s.delete_for_collection(&c.id).await.unwrap(), 1);
        assert!(!s.delete_schedule(&sched.id).await.unwrap());
    }
}
