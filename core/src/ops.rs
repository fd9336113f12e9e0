//! Runner operations as one surface: direct methods on [`RunnerService`]
//! and the serializable [`RunnerOperation`] enum routed by `dispatch`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::runner::{
    ExecutionConfig, ProgressFn, ReplayTemplate, RunExecution, RunnerCollection, RunnerEngine,
};
use crate::schedule::{DueRun, ScheduleSpec, ScheduledRun, Scheduler};
use crate::store::CollectionStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RunnerOperation {
    CreateCollection {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        templates: Vec<ReplayTemplate>,
        #[serde(default)]
        execution_config: ExecutionConfig,
    },
    UpdateCollection {
        collection: RunnerCollection,
    },
    DeleteCollection {
        collection_id: String,
    },
    ExecuteCollection {
        collection_id: String,
    },
    ScheduleCollection {
        collection_id: String,
        spec: ScheduleSpec,
    },
    PollDueSchedules {
        #[serde(default)]
        now: Option<DateTime<Utc>>,
    },
    CancelRun {
        run_id: String,
    },
    ListCollections,
    ListSchedules,
    History,
}

impl RunnerOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateCollection { .. } => "create_collection",
            Self::UpdateCollection { .. } => "update_collection",
            Self::DeleteCollection { .. } => "delete_collection",
            Self::ExecuteCollection { .. } => "execute_collection",
            Self::ScheduleCollection { .. } => "schedule_collection",
            Self::PollDueSchedules { .. } => "poll_due_schedules",
            Self::CancelRun { .. } => "cancel_run",
            Self::ListCollections => "list_collections",
            Self::ListSchedules => "list_schedules",
            Self::History => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutput {
    Collection(RunnerCollection),
    Collections { collections: Vec<RunnerCollection> },
    Deleted { deleted: bool, schedules_removed: usize },
    Run(RunExecution),
    Runs { runs: Vec<RunExecution> },
    Schedule(ScheduledRun),
    Schedules { schedules: Vec<ScheduledRun> },
    Fired { fired: Vec<DueRun> },
    Cancelled { cancelled: bool },
}

/// Collections, runs and schedules behind one handle.
#[derive(Clone)]
pub struct RunnerService {
    store: Arc<dyn CollectionStore>,
    engine: RunnerEngine,
    scheduler: Scheduler,
}

impl RunnerService {
    pub fn new(engine: RunnerEngine, scheduler: Scheduler) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
            scheduler,
        }
    }

    pub fn engine(&self) -> &RunnerEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn create_collection(
        &self,
        name: &str,
        description: &str,
        templates: Vec<ReplayTemplate>,
        execution_config: ExecutionConfig,
    ) -> Result<RunnerCollection, RunnerError> {
        if name.trim().is_empty() {
            return Err(RunnerError::validation("collection name must not be empty"));
        }
        let mut collection = RunnerCollection::new(name.trim(), templates);
        collection.description = description.to_string();
        collection.execution_config = execution_config;
        self.store.save_collection(collection.clone()).await?;
        tracing::info!(
            target: "wiretap.runner",
            stage = "collection.created",
            collection_id = %collection.id,
            templates = collection.templates.len()
        );
        Ok(collection)
    }

    /// Replaces the editable fields. Run counters and `created_at` stay with
    /// the stored copy.
    pub async fn update_collection(
        &self,
        collection: RunnerCollection,
    ) -> Result<RunnerCollection, RunnerError> {
        if collection.name.trim().is_empty() {
            return Err(RunnerError::validation("collection name must not be empty"));
        }
        let id = collection.id.clone();
        let updated = self
            .store
            .edit_collection(collection, Utc::now())
            .await?
            .ok_or(RunnerError::CollectionNotFound(id))?;
        Ok(updated)
    }

    /// Deletes the collection and every schedule that points at it.
    pub async fn delete_collection(&self, collection_id: &str) -> Result<(bool, usize), RunnerError> {
        let schedules_removed = self.scheduler.delete_for_collection(collection_id).await?;
        let deleted = self.store.delete_collection(collection_id).await?;
        tracing::info!(
            target: "wiretap.runner",
            stage = "collection.deleted",
            collection_id = %collection_id,
            deleted,
            schedules_removed
        );
        Ok((deleted, schedules_removed))
    }

    pub async fn execute_collection(
        &self,
        collection_id: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<RunExecution, RunnerError> {
        self.engine
            .execute_collection(collection_id, on_progress)
            .await
    }

    pub async fn schedule_collection(
        &self,
        collection_id: &str,
        spec: ScheduleSpec,
    ) -> Result<ScheduledRun, RunnerError> {
        self.scheduler
            .schedule_collection(collection_id, spec, Utc::now())
            .await
    }

    pub async fn poll_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<DueRun>, RunnerError> {
        self.scheduler.run_due(now).await
    }

    pub fn cancel_run(&self, run_id: &str) -> bool {
        self.engine.cancel_run(run_id)
    }

    pub async fn dispatch(&self, op: RunnerOperation) -> Result<OperationOutput, RunnerError> {
        tracing::debug!(target: "wiretap.runner", stage = "ops.dispatch", op = op.name());
        let out = match op {
            RunnerOperation::CreateCollection {
                name,
                description,
                templates,
                execution_config,
            } => OperationOutput::Collection(
                self.create_collection(&name, &description, templates, execution_config)
                    .await?,
            ),
            RunnerOperation::UpdateCollection { collection } => {
                OperationOutput::Collection(self.update_collection(collection).await?)
            }
            RunnerOperation::DeleteCollection { collection_id } => {
                let (deleted, schedules_removed) = self.delete_collection(&collection_id).await?;
                OperationOutput::Deleted {
                    deleted,
                    schedules_removed,
                }
            }
            RunnerOperation::ExecuteCollection { collection_id } => {
                OperationOutput::Run(self.execute_collection(&collection_id, None).await?)
            }
            RunnerOperation::ScheduleCollection {
                collection_id,
                spec,
            } => OperationOutput::Schedule(self.schedule_collection(&collection_id, spec).await?),
            RunnerOperation::PollDueSchedules { now } => OperationOutput::Fired {
                fired: self
                    .poll_due_schedules(now.unwrap_or_else(Utc::now))
                    .await?,
            },
            RunnerOperation::CancelRun { run_id } => OperationOutput::Cancelled {
                cancelled: self.cancel_run(&run_id),
            },
            RunnerOperation::ListCollections => OperationOutput::Collections {
                collections: self.store.list_collections().await?,
            },
            RunnerOperation::ListSchedules => OperationOutput::Schedules {
                schedules: self.scheduler.list().await?,
            },
            RunnerOperation::History => OperationOutput::Runs {
                runs: self.engine.history(),
            },
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistConfig, RunnerConfig, SchedulerConfig};
    use crate::error::TransportError;
    use crate::persist::{MemorySink, PersistQueue};
    use crate::runner::{PreparedRequest, ReplayTransport, StaticVariables, TransportResponse};
    use crate::store::InMemoryCollectionStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Ok204;

    #[async_trait]
    impl ReplayTransport for Ok204 {
        fn name(&self) -> &str {
            "ok"
        }

        async fn send(&self, _request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse {
                status: 204,
                headers: Vec::new(),
            })
        }
    }

    fn service() -> RunnerService {
        let store: Arc<dyn CollectionStore> = Arc::new(InMemoryCollectionStore::new());
        let persist = PersistQueue::start(Arc::new(MemorySink::new()), &PersistConfig::default());
        let engine = RunnerEngine::new(
            Arc::new(Ok204),
            Arc::new(StaticVariables::default()),
            store.clone(),
            persist,
            &RunnerConfig::default(),
        );
        let scheduler = Scheduler::new(store, engine.clone(), &SchedulerConfig::default());
        RunnerService::new(engine, scheduler)
    }

    #[tokio::test]
    async fn test_dispatch_from_json() {
        let svc = service();
        let op: RunnerOperation = serde_json::from_str(
            r#"{"op":"create_collection","name":"smoke","templates":[{"url":"http://a.test/"}]}"#,
        )
        .unwrap();
        let OperationOutput::Collection(c) = svc.dispatch(op).await.unwrap() else {
            panic!("expected collection");
        };

        let out = svc
            .dispatch(RunnerOperation::ExecuteCollection {
                collection_id: c.id.clone(),
            })
            .await
            .unwrap();
        let OperationOutput::Run(run) = out else {
            panic!("expected run");
        };
        assert_eq!(run.succeeded, 1);

        let OperationOutput::Runs { runs } = svc.dispatch(RunnerOperation::History).await.unwrap()
        else {
            panic!("expected runs");
        };
        assert_eq!(runs.len(), 1);

        let cancelled = svc
            .dispatch(RunnerOperation::CancelRun { run_id: run.id })
            .await
            .unwrap();
        assert_eq!(cancelled, OperationOutput::Cancelled { cancelled: false });
    }

    #[tokio::test]
    async fn test_delete_collection_cascades_schedules() {
        let svc = service();
        let c = svc
            .create_collection(
                "c",
                "",
                vec![ReplayTemplate::get("http://a.test/")],
                ExecutionConfig::default(),
            )
            .await
            .unwrap();
        svc.schedule_collection(&c.id, ScheduleSpec::Interval { minutes: 5 })
            .await
            .unwrap();
        svc.schedule_collection(
            &c.id,
            ScheduleSpec::Daily {
                time: "09:00".to_string(),
            },
        )
        .await
        .unwrap();

        let out = svc
            .dispatch(RunnerOperation::DeleteCollection {
                collection_id: c.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            out,
            OperationOutput::Deleted {
                deleted: true,
                schedules_removed: 2
            }
        );
        assert!(svc.scheduler().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_counters() {
        let svc = service();
        let c = svc
            .create_collection(
                "c",
                "",
                vec![ReplayTemplate::get("http://a.test/")],
                ExecutionConfig::default(),
            )
            .await
            .unwrap();
        svc.execute_collection(&c.id, None).await.unwrap();

        let mut edited = c.clone();
        edited.name = "renamed".to_string();
        edited.run_count = 0;
        let updated = svc.update_collection(edited).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.created_at, c.created_at);
    }

    #[tokio::test]
    async fn test_validation_errors_surface() {
        let svc = service();
        assert!(svc
            .create_collection("  ", "", Vec::new(), ExecutionConfig::default())
            .await
            .unwrap_err()
            .is_validation());

        let c = svc
            .create_collection("empty", "", Vec::new(), ExecutionConfig::default())
            .await
            .unwrap();
        assert!(svc
            .execute_collection(&c.id, None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(svc
            .schedule_collection(&c.id, ScheduleSpec::Interval { minutes: 0 })
            .await
            .unwrap_err()
            .is_validation());
    }
}
