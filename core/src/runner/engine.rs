use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use super::model::{
    ExecutionConfig, ExecutionMode, ReplayOutcome, ReplayTemplate, RunExecution, RunStatus,
    RunnerCollection,
};
use super::replay::replay_one;
use super::transport::ReplayTransport;
use super::variables::VariableSource;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::persist::{PersistQueue, Record};
use crate::store::CollectionStore;
use crate::util::Ring;

/// Snapshot handed to the progress callback after every outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub run_id: String,
    pub index: usize,
    /// Whether the outcome at `index` succeeded.
    pub success: bool,
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub type ProgressFn = Arc<dyn Fn(&RunProgress) + Send + Sync>;

/// What to run. Built from a stored collection or ad hoc.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub collection_id: Option<String>,
    pub templates: Vec<ReplayTemplate>,
    pub execution: ExecutionConfig,
}

impl RunConfig {
    pub fn for_collection(collection: &RunnerCollection) -> Self {
        Self {
            collection_id: Some(collection.id.clone()),
            templates: collection.templates.clone(),
            execution: collection.execution_config.clone(),
        }
    }

    pub fn adhoc(templates: Vec<ReplayTemplate>, execution: ExecutionConfig) -> Self {
        Self {
            collection_id: None,
            templates,
            execution,
        }
    }
}

struct Tally {
    run_id: String,
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: &ReplayOutcome) -> RunProgress {
        self.completed += 1;
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        RunProgress {
            run_id: self.run_id.clone(),
            index: outcome.index,
            success: outcome.success,
            completed: self.completed,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }
}

struct Inner {
    transport: Arc<dyn ReplayTransport>,
    variables: Arc<dyn VariableSource>,
    store: Arc<dyn CollectionStore>,
    persist: PersistQueue,
    history: Ring<RunExecution>,
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

/// Executes replay batches and keeps the recent run history.
#[derive(Clone)]
pub struct RunnerEngine {
    inner: Arc<Inner>,
}

impl RunnerEngine {
    pub fn new(
        transport: Arc<dyn ReplayTransport>,
        variables: Arc<dyn VariableSource>,
        store: Arc<dyn CollectionStore>,
        persist: PersistQueue,
        cfg: &RunnerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                variables,
                store,
                persist,
                history: Ring::new(cfg.history_capacity),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CollectionStore> {
        &self.inner.store
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads a stored collection and executes it.
    pub async fn execute_collection(
        &self,
        collection_id: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<RunExecution, RunnerError> {
        let collection = self
            .inner
            .store
            .collection(collection_id)
            .await?
            .ok_or_else(|| RunnerError::CollectionNotFound(collection_id.to_string()))?;
        self.execute(RunConfig::for_collection(&collection), on_progress)
            .await
    }

    pub async fn execute(
        &self,
        config: RunConfig,
        on_progress: Option<ProgressFn>,
    ) -> Result<RunExecution, RunnerError> {
        if config.templates.is_empty() {
            return Err(RunnerError::validation("no templates to run"));
        }

        let run_id = Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        self.active().insert(run_id.clone(), cancel.clone());

        let mode = config.execution.mode;
        let total = config.templates.len();
        tracing::info!(
            target: "wiretap.runner",
            stage = "run.start",
            run_id = %run_id,
            collection_id = config.collection_id.as_deref().unwrap_or("-"),
            mode = %mode,
            total
        );

        let variables = if config.execution.use_variable_substitution {
            match self.inner.variables.variables().await {
                Ok(vars) => Some(vars),
                Err(err) => {
                    tracing::warn!(
                        target: "wiretap.runner",
                        stage = "run.variables_unavailable",
                        run_id = %run_id,
                        error = %err
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut execution = RunExecution {
            id: run_id.clone(),
            collection_id: config.collection_id.clone(),
            mode,
            status: RunStatus::Running,
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            results: Vec::with_capacity(total),
            started_at: Utc::now(),
            ended_at: None,
        };
        let tally = Tally {
            run_id: run_id.clone(),
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
        };

        let (results, status) = match mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&config, variables, tally, &cancel, on_progress)
                    .await
            }
            ExecutionMode::Parallel => {
                self.run_parallel(&config, variables, tally, &cancel, on_progress)
                    .await
            }
        };

        execution.completed = results.len();
        execution.succeeded = results.iter().filter(|r| r.success).count();
        execution.failed = execution.completed - execution.succeeded;
        execution.results = results;
        execution.status = status;
        execution.ended_at = Some(Utc::now());

        self.finalize(&execution).await;
        Ok(execution)
    }

    async fn run_sequential(
        &self,
        config: &RunConfig,
        variables: Option<HashMap<String, String>>,
        mut tally: Tally,
        cancel: &AtomicBool,
        on_progress: Option<ProgressFn>,
    ) -> (Vec<ReplayOutcome>, RunStatus) {
        let delay = config.execution.inter_request_delay_ms;
        let last = config.templates.len() - 1;
        let mut results = Vec::with_capacity(config.templates.len());

        for (index, template) in config.templates.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(
                    target: "wiretap.runner",
                    stage = "run.cancelled",
                    run_id = %tally.run_id,
                    completed = results.len()
                );
                return (results, RunStatus::Cancelled);
            }

            let outcome = replay_one(
                self.inner.transport.as_ref(),
                index,
                template,
                &config.execution,
                variables.as_ref(),
            )
            .await;
            let progress = tally.record(&outcome);
            results.push(outcome);
            if let Some(cb) = &on_progress {
                cb(&progress);
            }

            if delay > 0 && index < last {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        (results, RunStatus::Completed)
    }

    async fn run_parallel(
        &self,
        config: &RunConfig,
        variables: Option<HashMap<String, String>>,
        tally: Tally,
        cancel: &AtomicBool,
        on_progress: Option<ProgressFn>,
    ) -> (Vec<ReplayOutcome>, RunStatus) {
        // Once dispatched, every template settles regardless of cancellation.
        if cancel.load(Ordering::SeqCst) {
            return (Vec::new(), RunStatus::Cancelled);
        }

        let variables = Arc::new(variables);
        let tally = Arc::new(Mutex::new(tally));
        let mut futs = FuturesUnordered::new();

        for (index, template) in config.templates.iter().enumerate() {
            let transport = self.inner.transport.clone();
            let template = template.clone();
            let exec_cfg = config.execution.clone();
            let variables = variables.clone();
            let tally = tally.clone();
            let on_progress = on_progress.clone();

            let handle = tokio::spawn(async move {
                let outcome = replay_one(
                    transport.as_ref(),
                    index,
                    &template,
                    &exec_cfg,
                    variables.as_ref().as_ref(),
                )
                .await;
                let progress = tally
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(&outcome);
                if let Some(cb) = &on_progress {
                    cb(&progress);
                }
                outcome
            });
            futs.push(async move { (index, handle.await) });
        }

        let mut slots: Vec<Option<ReplayOutcome>> = vec![None; config.templates.len()];
        let mut faulted = false;
        while let Some((index, joined)) = futs.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    faulted = true;
                    tracing::error!(
                        target: "wiretap.runner",
                        stage = "run.task_failed",
                        index,
                        error = %err
                    );
                    ReplayOutcome::failed(index, &config.templates[index], err.to_string())
                }
            };
            slots[index] = Some(outcome);
        }

        let results = slots.into_iter().flatten().collect();
        let status = if faulted {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        (results, status)
    }

    async fn finalize(&self, execution: &RunExecution) {
        self.active().remove(&execution.id);

        if let Some(collection_id) = &execution.collection_id {
            let at = execution.ended_at.unwrap_or_else(Utc::now);
            if let Err(err) = self.inner.store.record_run(collection_id, at).await {
                tracing::warn!(
                    target: "wiretap.runner",
                    stage = "run.bump_failed",
                    collection_id = %collection_id,
                    error = %err
                );
            }
        }

        self.inner
            .persist
            .enqueue(Record::RunExecution(execution.clone()))
            .await;
        self.inner.history.push(execution.clone());

        tracing::info!(
            target: "wiretap.runner",
            stage = "run.end",
            run_id = %execution.id,
            status = %execution.status,
            succeeded = execution.succeeded,
            failed = execution.failed,
            total = execution.total
        );
    }

    /// Requests cooperative cancellation. True only the first time for an
    /// active run.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.active().get(run_id) {
            Some(flag) => !flag.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Most recent first.
    pub fn history(&self) -> Vec<RunExecution> {
        self.inner.history.snapshot()
    }

    pub fn recent_run(&self, run_id: &str) -> Option<RunExecution> {
        self.inner.history.find(|r| r.id == run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Header;
    use crate::config::PersistConfig;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::persist::MemorySink;
    use crate::runner::transport::{PreparedRequest, TransportResponse};
    use crate::runner::variables::StaticVariables;
    use crate::store::InMemoryCollectionStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Answers 200, except for urls containing "down" which fail to connect.
    /// Urls containing "slow" are delayed so completions arrive out of order.
    struct FakeTransport;

    #[async_trait]
    impl ReplayTransport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            if request.url.contains("slow") {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            if request.url.contains("down") {
                return Err(TransportError::new(
                    TransportErrorKind::Connect,
                    request.url,
                    "connection refused",
                ));
            }
            let auth = request
                .headers
                .iter()
                .find(|h| h.name == "Authorization")
                .map(|h| h.value.clone())
                .unwrap_or_default();
            Ok(TransportResponse {
                status: 200,
                headers: vec![Header::new("X-Echo-Auth", auth)],
            })
        }
    }

    struct Fixture {
        engine: RunnerEngine,
        store: Arc<InMemoryCollectionStore>,
        sink: MemorySink,
        persist: PersistQueue,
    }

    fn fixture(vars: &[(&str, &str)]) -> Fixture {
        let sink = MemorySink::new();
        let persist = PersistQueue::start(Arc::new(sink.clone()), &PersistConfig::default());
        let store = Arc::new(InMemoryCollectionStore::new());
        let variables = StaticVariables(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let engine = RunnerEngine::new(
            Arc::new(FakeTransport),
            Arc::new(variables),
            store.clone(),
            persist.clone(),
            &RunnerConfig::default(),
        );
        Fixture {
            engine,
            store,
            sink,
            persist,
        }
    }

    fn templates(urls: &[&str]) -> Vec<ReplayTemplate> {
        urls.iter().map(|u| ReplayTemplate::get(*u)).collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let fx = fixture(&[]);
        let err = fx
            .engine
            .execute(RunConfig::adhoc(Vec::new(), ExecutionConfig::default()), None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(fx.engine.history().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_cancel_after_k_keeps_results() {
        let fx = fixture(&[]);
        let engine = fx.engine.clone();
        let on_progress: ProgressFn = Arc::new(move |p: &RunProgress| {
            if p.completed == 2 {
                assert!(engine.cancel_run(&p.run_id));
                assert!(!engine.cancel_run(&p.run_id));
            }
        });

        let run = fx
            .engine
            .execute(
                RunConfig::adhoc(
                    templates(&[
                        "http://a.test/1",
                        "http://a.test/2",
                        "http://a.test/3",
                        "http://a.test/4",
                    ]),
                    ExecutionConfig::default(),
                ),
                Some(on_progress),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.results.len(), 2);
        assert_eq!(run.completed, 2);
        assert_eq!(run.total, 4);
        assert!(fx.engine.active_runs().is_empty());
        assert!(!fx.engine.cancel_run(&run.id));
    }

    /// Records the (virtual) instant of every send.
    struct StampingTransport(Mutex<Vec<tokio::time::Instant>>);

    #[async_trait]
    impl ReplayTransport for StampingTransport {
        fn name(&self) -> &str {
            "stamping"
        }

        async fn send(&self, _request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            self.0.lock().unwrap().push(tokio::time::Instant::now());
            Ok(TransportResponse {
                status: 204,
                headers: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_delay_only_between_templates() {
        let transport = Arc::new(StampingTransport(Mutex::new(Vec::new())));
        let sink = MemorySink::new();
        let persist = PersistQueue::start(Arc::new(sink), &PersistConfig::default());
        let engine = RunnerEngine::new(
            transport.clone(),
            Arc::new(StaticVariables(HashMap::new())),
            Arc::new(InMemoryCollectionStore::new()),
            persist,
            &RunnerConfig::default(),
        );

        let began = tokio::time::Instant::now();
        let run = engine
            .execute(
                RunConfig::adhoc(
                    templates(&["http://a.test/1", "http://a.test/2", "http://a.test/3"]),
                    ExecutionConfig {
                        inter_request_delay_ms: 250,
                        ..ExecutionConfig::default()
                    },
                ),
                None,
            )
            .await
            .unwrap();
        let returned = tokio::time::Instant::now();

        assert_eq!(run.status, RunStatus::Completed);
        let stamps = transport.0.lock().unwrap().clone();
        assert_eq!(stamps.len(), 3);
        let slack = Duration::from_millis(5);
        assert!(stamps[0] - began < slack);
        for pair in stamps.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(250) && gap < Duration::from_millis(250) + slack);
        }
        // Two gaps for three templates, nothing after the last one.
        assert!(returned - stamps[2] < slack);
        assert!(returned - began < Duration::from_millis(500) + slack);
    }

    #[tokio::test]
    async fn test_parallel_failure_keeps_template_order() {
        let fx = fixture(&[]);
        let config = RunConfig::adhoc(
            templates(&["http://slow.test/0", "http://down.test/1", "http://a.test/2"]),
            ExecutionConfig {
                mode: ExecutionMode::Parallel,
                ..ExecutionConfig::default()
            },
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let on_progress: ProgressFn = Arc::new(move |p: &RunProgress| {
            seen_cb.lock().unwrap().push(p.completed);
        });

        let run = fx.engine.execute(config, Some(on_progress)).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.succeeded, 2);
        assert_eq!(run.failed, 1);
        let indexes: Vec<usize> = run.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(run.results[1].status, 0);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_collection_run_bumps_counters_and_persists() {
        let fx = fixture(&[("TOKEN", "s3cret")]);
        let mut collection = RunnerCollection::new(
            "smoke",
            vec![ReplayTemplate {
                headers: crate::runner::TemplateHeaders::from_pairs([(
                    "Authorization",
                    "Bearer ${TOKEN}",
                )]),
                ..ReplayTemplate::get("http://a.test/")
            }],
        );
        collection.execution_config.use_variable_substitution = true;
        fx.store.save_collection(collection.clone()).await.unwrap();

        let run = fx
            .engine
            .execute_collection(&collection.id, None)
            .await
            .unwrap();
        fx.persist.flush().await;

        assert_eq!(
            run.results[0].response_headers,
            vec![Header::new("X-Echo-Auth", "Bearer s3cret")]
        );
        let stored = fx.store.collection(&collection.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 1);
        assert_eq!(stored.last_run_at, run.ended_at);

        assert_eq!(fx.sink.runs().len(), 1);
        assert_eq!(fx.engine.recent_run(&run.id).unwrap().id, run.id);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let fx = fixture(&[]);
        let err = fx.engine.execute_collection("nope", None).await.unwrap_err();
        assert!(matches!(err, RunnerError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_history_is_bounded_newest_first() {
        let sink = MemorySink::new();
        let persist = PersistQueue::start(Arc::new(sink), &PersistConfig::default());
        let engine = RunnerEngine::new(
            Arc::new(FakeTransport),
            Arc::new(StaticVariables::default()),
            Arc::new(InMemoryCollectionStore::new()),
            persist,
            &RunnerConfig {
                history_capacity: 2,
                ..RunnerConfig::default()
            },
        );

        let mut ids = Vec::new();
        for _ in 0..3 {
            let run = engine
                .execute(
                    RunConfig::adhoc(templates(&["http://a.test/"]), ExecutionConfig::default()),
                    None,
                )
                .await
                .unwrap();
            ids.push(run.id);
        }

        let history: Vec<String> = engine.history().into_iter().map(|r| r.id).collect();
        assert_eq!(history, vec![ids[2].clone(), ids[1].clone()]);
        assert!(engine.recent_run(&ids[0]).is_none());
    }
}
