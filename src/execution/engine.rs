//! Orchestrator - the single entry point for running pipelines
//!
//! Direct invocations and schedule firings both end up in [`Orchestrator::run_with`]:
//! build the DAG, execute it, record history.

use crate::{
    cache::CacheResolver,
    core::{
        error::{BuildError, OrchestratorError},
        pipeline::Pipeline,
        registry::StepRegistry,
    },
    execution::{
        backend::{ExecutionBackend, LocalBackend},
        cancel::CancellationHandle,
        events::ExecutionEvent,
        scheduler::{RunConfig, RunReport, RunScheduler},
    },
    graph::{Dag, GraphBuilder},
    integrations::{ExperimentTracker, ModelRegistry},
    persistence::{create_summary, PersistenceBackend},
    schedule::RunRequest,
    store::{ArtifactStore, CacheIndex, InMemoryStore},
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Builds DAGs and runs them
pub struct Orchestrator {
    registry: Arc<StepRegistry>,
    pipelines: RwLock<HashMap<String, Pipeline>>,
    scheduler: RunScheduler,
    history: Option<Arc<dyn PersistenceBackend>>,
    config: RunConfig,
}

impl Orchestrator {
    pub fn builder(registry: StepRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Default run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Make a pipeline available to `submit` (and therefore to schedules).
    /// Returns the pipeline previously registered under the same name.
    pub async fn register_pipeline(&self, pipeline: Pipeline) -> Option<Pipeline> {
        info!("Registered pipeline {}", pipeline.name);
        self.pipelines
            .write()
            .await
            .insert(pipeline.name.clone(), pipeline)
    }

    pub async fn pipeline(&self, name: &str) -> Option<Pipeline> {
        self.pipelines.read().await.get(name).cloned()
    }

    /// Build without executing
    pub fn plan(
        &self,
        pipeline: &Pipeline,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Dag, BuildError> {
        GraphBuilder::new(&self.registry).build(pipeline, parameters)
    }

    /// Run a pipeline with the default configuration
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<RunReport, OrchestratorError> {
        self.run_with(pipeline, parameters, &self.config, &CancellationHandle::new())
            .await
    }

    /// Run a pipeline. Build errors are returned before anything is
    /// dispatched; everything after that is reported in the `RunReport`.
    pub async fn run_with(
        &self,
        pipeline: &Pipeline,
        parameters: &BTreeMap<String, Value>,
        config: &RunConfig,
        cancel: &CancellationHandle,
    ) -> Result<RunReport, OrchestratorError> {
        let dag = self.plan(pipeline, parameters)?;
        let run_id = Uuid::new_v4();

        let report = self.scheduler.execute(&dag, config, run_id, cancel).await;

        if let Some(history) = &self.history {
            if let Err(e) = history.save_run(&create_summary(&report)).await {
                warn!("Failed to save run history for {}: {:#}", run_id, e);
            }
        }

        Ok(report)
    }

    /// Run a registered pipeline by name
    pub async fn submit(&self, request: RunRequest) -> Result<RunReport, OrchestratorError> {
        self.submit_with(request, &CancellationHandle::new()).await
    }

    /// Run a registered pipeline by name under an external cancellation signal
    pub async fn submit_with(
        &self,
        request: RunRequest,
        cancel: &CancellationHandle,
    ) -> Result<RunReport, OrchestratorError> {
        let pipeline = self
            .pipeline(&request.pipeline)
            .await
            .ok_or_else(|| OrchestratorError::UnknownPipeline(request.pipeline.clone()))?;

        if let Some(schedule) = &request.schedule {
            info!("Schedule {} triggered {}", schedule, pipeline.name);
        }

        self.run_with(&pipeline, &request.parameters, &self.config, cancel)
            .await
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.scheduler.events().subscribe(handler).await;
    }
}

/// Assembles an [`Orchestrator`]; everything but the registry has a default
pub struct OrchestratorBuilder {
    registry: StepRegistry,
    backend: Option<Arc<dyn ExecutionBackend>>,
    store: Option<Arc<dyn ArtifactStore>>,
    index: Option<Arc<dyn CacheIndex>>,
    trackers: Vec<(String, Arc<dyn ExperimentTracker>)>,
    models: Option<Arc<dyn ModelRegistry>>,
    history: Option<Arc<dyn PersistenceBackend>>,
    config: RunConfig,
}

impl OrchestratorBuilder {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry,
            backend: None,
            store: None,
            index: None,
            trackers: Vec::new(),
            models: None,
            history: None,
            config: RunConfig::default(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use one object as both artifact store and cache index
    pub fn storage<S>(mut self, storage: Arc<S>) -> Self
    where
        S: ArtifactStore + CacheIndex + 'static,
    {
        self.store = Some(storage.clone());
        self.index = Some(storage);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache_index(mut self, index: Arc<dyn CacheIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn tracker(mut self, name: impl Into<String>, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.trackers.push((name.into(), tracker));
        self
    }

    pub fn model_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.models = Some(registry);
        self
    }

    pub fn history(mut self, history: Arc<dyn PersistenceBackend>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        let memory = Arc::new(InMemoryStore::new());
        let store: Arc<dyn ArtifactStore> = self.store.unwrap_or_else(|| memory.clone());
        let index: Arc<dyn CacheIndex> = self.index.unwrap_or(memory);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(LocalBackend::new()));

        let mut scheduler = RunScheduler::new(backend, store.clone(), CacheResolver::new(index, store));
        for (name, tracker) in self.trackers {
            scheduler = scheduler.with_tracker(name, tracker);
        }
        if let Some(models) = self.models {
            scheduler = scheduler.with_model_registry(models);
        }

        Orchestrator {
            registry: Arc::new(self.registry),
            pipelines: RwLock::new(HashMap::new()),
            scheduler,
            history: self.history,
            config: self.config,
        }
    }
}
