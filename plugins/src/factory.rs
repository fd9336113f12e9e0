//! Builds the concrete collaborators from [`AppConfig`] and wires them into
//! the core engines.

use std::sync::Arc;

use anyhow::Result;
use wiretap_core::capture::{CaptureEngine, ContextResolver};
use wiretap_core::config::AppConfig;
use wiretap_core::persist::{PersistQueue, RecordSink};
use wiretap_core::runner::{ReplayTransport, RunnerEngine, StaticVariables, VariableSource};
use wiretap_core::schedule::Scheduler;
use wiretap_core::store::CollectionStore;
use wiretap_core::RunnerService;

use crate::sink::JsonlRecordSink;
use crate::store::JsonFileCollectionStore;
use crate::transport::ReqwestTransport;

pub fn build_transport(cfg: &AppConfig) -> Result<Arc<dyn ReplayTransport>> {
    Ok(Arc::new(ReqwestTransport::new(&cfg.runner)?))
}

pub fn build_variables(cfg: &AppConfig) -> Arc<dyn VariableSource> {
    Arc::new(StaticVariables(cfg.runner.variables.clone()))
}

pub async fn build_sink(cfg: &AppConfig) -> Result<Arc<dyn RecordSink>> {
    Ok(Arc::new(JsonlRecordSink::open(&cfg.persist.path).await?))
}

pub async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn CollectionStore>> {
    Ok(Arc::new(
        JsonFileCollectionStore::open(&cfg.runner.store_path).await?,
    ))
}

/// Starts the persistence writer. Needs a running tokio runtime.
pub async fn build_persist(cfg: &AppConfig) -> Result<PersistQueue> {
    let sink = build_sink(cfg).await?;
    Ok(PersistQueue::start(sink, &cfg.persist))
}

pub fn build_capture(
    cfg: &AppConfig,
    resolver: Arc<dyn ContextResolver>,
    persist: PersistQueue,
) -> CaptureEngine {
    CaptureEngine::new(&cfg.capture, &cfg.filter, resolver, persist)
}

/// Runner engine, scheduler and the operation surface over one store.
pub fn build_runner_service(
    cfg: &AppConfig,
    transport: Arc<dyn ReplayTransport>,
    store: Arc<dyn CollectionStore>,
    persist: PersistQueue,
) -> RunnerService {
    let engine = RunnerEngine::new(
        transport,
        build_variables(cfg),
        store.clone(),
        persist,
        &cfg.runner,
    );
    let scheduler = Scheduler::new(store, engine.clone(), &cfg.scheduler);
    RunnerService::new(engine, scheduler)
}
