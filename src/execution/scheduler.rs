//! Run scheduler - dispatches a DAG's nodes with bounded concurrency
//!
//! The scheduler owns the node state table and the ready queue for one run.
//! Ready nodes are resolved against the cache first; misses are submitted to
//! the execution backend, and completions are awaited through a `JoinSet`
//! raced against the run's cancellation signal.

use crate::cache::{CacheDecision, CacheKey, CacheResolver, ResolvedInput};
use crate::core::{
    error::{BackendError, StepError},
    state::{NodeState, RunStatus},
    step::StepOutput,
};
use crate::execution::{
    backend::{BackendHandle, ExecutionBackend, NodeSpec, Outcome},
    cancel::CancellationHandle,
    events::{EventBus, ExecutionEvent},
};
use crate::graph::{Dag, InputRef, Node};
use crate::integrations::{ExperimentTracker, ModelRegistry};
use crate::store::{ArtifactId, ArtifactStore, OutputArtifacts, TypedValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-run execution knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum outstanding dispatches; 0 is treated as 1
    pub concurrency: usize,

    /// Retry budget for steps that don't declare their own
    pub default_retries: usize,

    /// Run-level cache switch, combined with the pipeline's
    pub enable_cache: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_retries: 0,
            enable_cache: true,
        }
    }
}

/// Terminal record of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub id: String,
    pub step: String,
    pub state: NodeState,

    /// Attempts dispatched (0 for cache hits and skipped nodes)
    pub attempts: usize,

    /// Root cause for failed nodes
    pub error: Option<String>,

    pub cache_key: Option<CacheKey>,
    pub outputs: OutputArtifacts,
    pub model_version: Option<String>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// In declaration order
    pub nodes: Vec<NodeReport>,

    /// Set when the run was aborted by a backend failure
    pub fatal_error: Option<String>,
}

impl RunReport {
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

struct NodeRun {
    state: NodeState,
    attempts: usize,
    error: Option<String>,
    cache_key: Option<CacheKey>,
    outputs: OutputArtifacts,
    model_version: Option<String>,

    /// Upstream nodes not yet succeeded
    waiting_on: usize,

    /// Last spec submitted; retries resubmit it
    spec: Option<NodeSpec>,
}

type Completion = (usize, Result<Outcome, BackendError>);

/// Mutable state of one run
struct Run<'a> {
    dag: &'a Dag,
    config: &'a RunConfig,
    run_id: Uuid,
    nodes: Vec<NodeRun>,
    ready: VecDeque<usize>,
    in_flight: JoinSet<Completion>,
    handles: HashMap<usize, BackendHandle>,
    fatal: Option<String>,
    cancelled: bool,
}

enum Wake {
    Cancelled,
    Joined(Option<Result<Completion, JoinError>>),
}

impl<'a> Run<'a> {
    fn new(dag: &'a Dag, config: &'a RunConfig, run_id: Uuid) -> Self {
        let nodes = dag
            .nodes()
            .iter()
            .map(|node| NodeRun {
                state: NodeState::Pending,
                attempts: 0,
                error: None,
                cache_key: None,
                outputs: OutputArtifacts::new(),
                model_version: None,
                waiting_on: node.upstream.len(),
                spec: None,
            })
            .collect();

        Self {
            dag,
            config,
            run_id,
            nodes,
            ready: VecDeque::new(),
            in_flight: JoinSet::new(),
            handles: HashMap::new(),
            fatal: None,
            cancelled: false,
        }
    }

    fn accepting(&self) -> bool {
        !self.cancelled && self.fatal.is_none()
    }

    fn set_state(&mut self, index: usize, next: NodeState) {
        if let Err(e) = self.nodes[index].state.transition(next) {
            error!("{}: {}", self.dag.nodes()[index].id, e);
        }
    }

    fn mark_ready(&mut self, index: usize) {
        self.set_state(index, NodeState::Ready);
        self.ready.push_back(index);
    }

    /// Direct dependents whose last upstream just finished become ready,
    /// in declaration order.
    fn release_dependents(&mut self, index: usize) {
        let dag = self.dag;
        for &dependent in &dag.nodes()[index].downstream {
            let entry = &mut self.nodes[dependent];
            entry.waiting_on = entry.waiting_on.saturating_sub(1);
            if entry.waiting_on == 0 && entry.state == NodeState::Pending {
                self.mark_ready(dependent);
            }
        }
    }

    /// Artifact ids and lineage keys for every input of `node`
    fn resolve_inputs(&self, node: &Node) -> Result<BTreeMap<String, ResolvedInput>, StepError> {
        node.inputs
            .iter()
            .map(|(name, input)| {
                let resolved = match input {
                    InputRef::Literal(value) => ResolvedInput::literal(ArtifactId::for_value(value)),
                    InputRef::Upstream {
                        node: producer,
                        output,
                    } => {
                        let upstream = &self.nodes[*producer];
                        let artifact = upstream.outputs.get(output).cloned().ok_or_else(|| {
                            StepError::InvalidInput {
                                name: name.clone(),
                                reason: format!(
                                    "upstream `{}` recorded no output '{}'",
                                    self.dag.nodes()[*producer].id,
                                    output
                                ),
                            }
                        })?;
                        ResolvedInput {
                            artifact,
                            lineage: upstream.cache_key.clone(),
                        }
                    }
                };
                Ok((name.clone(), resolved))
            })
            .collect()
    }

    fn report(self, started_at: DateTime<Utc>, status: RunStatus) -> RunReport {
        let dag = self.dag;
        let nodes = dag
            .nodes()
            .iter()
            .zip(self.nodes)
            .map(|(node, run)| NodeReport {
                id: node.id.clone(),
                step: node.step.name.clone(),
                state: run.state,
                attempts: run.attempts,
                error: run.error,
                cache_key: run.cache_key,
                outputs: run.outputs,
                model_version: run.model_version,
            })
            .collect();

        RunReport {
            run_id: self.run_id,
            pipeline: dag.pipeline.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            nodes,
            fatal_error: self.fatal,
        }
    }
}

/// Dispatches DAG nodes to an execution backend
pub struct RunScheduler {
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn ArtifactStore>,
    cache: CacheResolver,
    trackers: HashMap<String, Arc<dyn ExperimentTracker>>,
    models: Option<Arc<dyn ModelRegistry>>,
    events: EventBus,
}

impl RunScheduler {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn ArtifactStore>,
        cache: CacheResolver,
    ) -> Self {
        Self {
            backend,
            store,
            cache,
            trackers: HashMap::new(),
            models: None,
            events: EventBus::new(),
        }
    }

    /// Make a tracker available to steps that name it
    pub fn with_tracker(mut self, name: impl Into<String>, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.trackers.insert(name.into(), tracker);
        self
    }

    pub fn with_model_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.models = Some(registry);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute every node of `dag` and report how each one ended
    pub async fn execute(
        &self,
        dag: &Dag,
        config: &RunConfig,
        run_id: Uuid,
        cancel: &CancellationHandle,
    ) -> RunReport {
        let started_at = Utc::now();
        let concurrency = config.concurrency.max(1);
        let mut run = Run::new(dag, config, run_id);

        info!(
            "Starting run {} of {} ({} nodes, concurrency {})",
            run_id,
            dag.pipeline,
            dag.len(),
            concurrency
        );
        self.events
            .emit(ExecutionEvent::RunStarted {
                run_id,
                pipeline: dag.pipeline.clone(),
                nodes: dag.len(),
            })
            .await;

        for index in dag.sources() {
            run.mark_ready(index);
        }

        loop {
            if cancel.is_cancelled() && !run.cancelled {
                self.begin_cancel(&mut run).await;
            }

            while run.accepting() && run.in_flight.len() < concurrency {
                let Some(index) = run.ready.pop_front() else {
                    break;
                };
                self.start_node(&mut run, index).await;
            }

            if run.in_flight.is_empty() {
                break;
            }

            let wake = tokio::select! {
                _ = cancel.cancelled(), if !run.cancelled => Wake::Cancelled,
                joined = run.in_flight.join_next() => Wake::Joined(joined),
            };

            match wake {
                Wake::Cancelled => self.begin_cancel(&mut run).await,
                Wake::Joined(Some(Ok((index, result)))) => {
                    self.finish_attempt(&mut run, index, result).await
                }
                Wake::Joined(Some(Err(e))) => {
                    error!("Backend wait task failed: {}", e);
                    self.abort(&mut run, BackendError::Join(e.to_string()).to_string())
                        .await;
                }
                Wake::Joined(None) => {}
            }
        }

        let cause = match (&run.fatal, run.cancelled) {
            (Some(fatal), _) => format!("run aborted: {}", fatal),
            (None, true) => "cancelled".to_string(),
            (None, false) => "not scheduled".to_string(),
        };
        for index in 0..run.nodes.len() {
            if !run.nodes[index].state.is_terminal() {
                run.set_state(index, NodeState::Failed);
                run.nodes[index].error = Some(cause.clone());
            }
        }

        let status = if run.cancelled {
            RunStatus::Cancelled
        } else if run.fatal.is_some() || run.nodes.iter().any(|n| n.state == NodeState::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let report = run.report(started_at, status);
        info!(
            "Run {} of {} finished: {} ({} succeeded, {} cached, {} failed)",
            run_id,
            dag.pipeline,
            status,
            report.count(NodeState::Succeeded),
            report.count(NodeState::CacheHit),
            report.count(NodeState::Failed)
        );
        self.events
            .emit(ExecutionEvent::RunCompleted { run_id, status })
            .await;
        report
    }

    /// Cache-resolve a ready node, then either complete it from cache or
    /// submit its first attempt
    async fn start_node(&self, run: &mut Run<'_>, index: usize) {
        let dag = run.dag;
        let node = &dag.nodes()[index];

        let resolved = match run.resolve_inputs(node) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.fail_node(run, index, e.to_string()).await;
                return;
            }
        };

        let enable_cache = dag.enable_cache && run.config.enable_cache;
        match self.cache.resolve(node, &resolved, enable_cache).await {
            CacheDecision::Hit { key, outputs } => {
                info!("{}: cache hit ({})", node.id, key.short());
                run.set_state(index, NodeState::CacheHit);
                let entry = &mut run.nodes[index];
                entry.cache_key = Some(key);
                entry.outputs = outputs;
                self.events
                    .emit(ExecutionEvent::NodeCacheHit {
                        node_id: node.id.clone(),
                    })
                    .await;
                run.release_dependents(index);
            }
            CacheDecision::Miss { key, reason } => {
                debug!("{}: cache miss ({}, {})", node.id, key.short(), reason);
                run.nodes[index].cache_key = Some(key);

                let inputs = match self.load_inputs(node, &resolved).await {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        self.fail_node(run, index, e.to_string()).await;
                        return;
                    }
                };

                let spec = NodeSpec {
                    run_id: run.run_id,
                    node_id: node.id.clone(),
                    step: node.step.clone(),
                    attempt: 1,
                    inputs,
                    settings: node.settings.clone(),
                };
                self.dispatch(run, index, spec).await;
            }
        }
    }

    async fn load_inputs(
        &self,
        node: &Node,
        resolved: &BTreeMap<String, ResolvedInput>,
    ) -> Result<BTreeMap<String, Value>, StepError> {
        let mut values = BTreeMap::new();
        for (name, input) in &node.inputs {
            let value = match input {
                InputRef::Literal(typed) => typed.value.clone(),
                InputRef::Upstream { .. } => {
                    let id = resolved
                        .get(name)
                        .map(|r| &r.artifact)
                        .ok_or_else(|| StepError::InvalidInput {
                            name: name.clone(),
                            reason: "unresolved".to_string(),
                        })?;
                    self.store
                        .get(id)
                        .await
                        .map_err(|e| StepError::InvalidInput {
                            name: name.clone(),
                            reason: e.to_string(),
                        })?
                        .value
                }
            };
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    async fn dispatch(&self, run: &mut Run<'_>, index: usize, spec: NodeSpec) {
        let attempt = spec.attempt;
        let node_id = spec.node_id.clone();

        match self.backend.submit(spec.clone()).await {
            Ok(handle) => {
                run.set_state(index, NodeState::Dispatched { attempt });
                let entry = &mut run.nodes[index];
                entry.attempts = attempt;
                entry.spec = Some(spec);
                run.handles.insert(index, handle);

                let backend = self.backend.clone();
                run.in_flight
                    .spawn(async move { (index, backend.wait(handle).await) });

                debug!("{}: dispatched attempt {}", node_id, attempt);
                self.events
                    .emit(ExecutionEvent::NodeDispatched { node_id, attempt })
                    .await;
            }
            Err(e @ BackendError::Unavailable(_)) => {
                error!("{}: {}", node_id, e);
                self.abort(run, e.to_string()).await;
            }
            Err(e) => {
                run.nodes[index].attempts = attempt;
                self.fail_node(run, index, e.to_string()).await;
            }
        }
    }

    async fn finish_attempt(
        &self,
        run: &mut Run<'_>,
        index: usize,
        result: Result<Outcome, BackendError>,
    ) {
        run.handles.remove(&index);
        let dag = run.dag;
        let node = &dag.nodes()[index];

        let failure = match result {
            Ok(Outcome::Succeeded(output)) => match self.commit(run, index, output).await {
                Ok(()) => return,
                Err(e) => e,
            },
            Ok(Outcome::Failed(e)) => e,
            Ok(Outcome::Cancelled) => StepError::Cancelled,
            Err(e) => StepError::Failed(e.to_string()),
        };

        let attempts = run.nodes[index].attempts;
        let budget = node.step.retries.unwrap_or(run.config.default_retries);
        if run.accepting() && failure != StepError::Cancelled && attempts <= budget {
            if let Some(spec) = run.nodes[index].spec.as_ref().map(NodeSpec::next_attempt) {
                warn!(
                    "{}: attempt {} failed ({}), retrying ({}/{})",
                    node.id, attempts, failure, attempts, budget
                );
                self.events
                    .emit(ExecutionEvent::NodeRetrying {
                        node_id: node.id.clone(),
                        attempt: spec.attempt,
                        error: failure.to_string(),
                    })
                    .await;
                self.dispatch(run, index, spec).await;
                return;
            }
        }

        self.fail_node(run, index, failure.to_string()).await;
    }

    /// Persist a successful attempt's outputs and release dependents
    async fn commit(&self, run: &mut Run<'_>, index: usize, output: StepOutput) -> Result<(), StepError> {
        let dag = run.dag;
        let node = &dag.nodes()[index];

        if let Some(missing) = node
            .step
            .outputs
            .iter()
            .find(|spec| !output.outputs.contains_key(&spec.name))
        {
            return Err(StepError::MissingOutput(missing.name.clone()));
        }
        for name in output.outputs.keys() {
            if node.step.output(name).is_none() {
                debug!("{}: ignoring undeclared output '{}'", node.id, name);
            }
        }

        let mut outputs = OutputArtifacts::new();
        for spec in &node.step.outputs {
            let value = output.outputs.get(&spec.name).cloned().unwrap_or(Value::Null);
            let id = self
                .store
                .put(TypedValue::new(spec.ty.clone(), value))
                .await
                .map_err(|e| StepError::Failed(format!("failed to store output '{}': {}", spec.name, e)))?;
            outputs.insert(spec.name.clone(), id);
        }

        if node.step.is_cacheable() {
            if let Some(key) = &run.nodes[index].cache_key {
                self.cache.record(key, &outputs).await;
            }
        }

        self.log_metrics(run.run_id, node, &output.metrics).await;
        let model_version = self.register_model(node, &outputs).await;

        let entry = &mut run.nodes[index];
        entry.outputs = outputs;
        entry.model_version = model_version;
        let attempts = entry.attempts;
        run.set_state(index, NodeState::Succeeded);

        info!("{}: succeeded (attempt {})", node.id, attempts);
        self.events
            .emit(ExecutionEvent::NodeSucceeded {
                node_id: node.id.clone(),
                attempts,
            })
            .await;
        run.release_dependents(index);
        Ok(())
    }

    async fn log_metrics(&self, run_id: Uuid, node: &Node, metrics: &[(String, Value)]) {
        let Some(name) = node.step.experiment_tracker.as_deref() else {
            return;
        };
        if metrics.is_empty() {
            return;
        }
        let Some(tracker) = self.trackers.get(name) else {
            warn!("{}: experiment tracker '{}' is not configured", node.id, name);
            return;
        };
        for (key, value) in metrics {
            if let Err(e) = tracker.log(run_id, &node.id, key, value).await {
                warn!("{}: failed to log '{}' to {}: {}", node.id, key, name, e);
            }
        }
    }

    async fn register_model(&self, node: &Node, outputs: &OutputArtifacts) -> Option<String> {
        let binding = node.step.model.as_ref()?;
        let Some(registry) = &self.models else {
            warn!("{}: no model registry configured for '{}'", node.id, binding.name);
            return None;
        };
        let artifact = outputs.get(&binding.output)?;

        match registry
            .register(&binding.name, binding.version.as_deref(), artifact)
            .await
        {
            Ok(version) => {
                info!("{}: registered model {} version {}", node.id, binding.name, version);
                Some(version)
            }
            Err(e) => {
                warn!("{}: failed to register model {}: {}", node.id, binding.name, e);
                None
            }
        }
    }

    /// Fail a node and every node that transitively depends on it
    async fn fail_node(&self, run: &mut Run<'_>, index: usize, error: String) {
        let dag = run.dag;
        let node = &dag.nodes()[index];

        error!("{}: failed: {}", node.id, error);
        run.set_state(index, NodeState::Failed);
        run.nodes[index].error = Some(error.clone());
        self.events
            .emit(ExecutionEvent::NodeFailed {
                node_id: node.id.clone(),
                error,
            })
            .await;

        let cause = format!("upstream `{}` failed", node.id);
        for dependent in dag.transitive_dependents(index) {
            if run.nodes[dependent].state.is_terminal() {
                continue;
            }
            run.set_state(dependent, NodeState::Failed);
            run.nodes[dependent].error = Some(cause.clone());
            self.events
                .emit(ExecutionEvent::NodeFailed {
                    node_id: dag.nodes()[dependent].id.clone(),
                    error: cause.clone(),
                })
                .await;
        }
    }

    async fn begin_cancel(&self, run: &mut Run<'_>) {
        warn!("Run {} cancelled", run.run_id);
        run.cancelled = true;
        self.cancel_in_flight(run).await;
    }

    async fn abort(&self, run: &mut Run<'_>, reason: String) {
        if run.fatal.is_none() {
            run.fatal = Some(reason);
        }
        self.cancel_in_flight(run).await;
    }

    async fn cancel_in_flight(&self, run: &Run<'_>) {
        for handle in run.handles.values() {
            if let Err(e) = self.backend.cancel(*handle).await {
                debug!("Cancel of handle {} failed: {}", handle.0, e);
            }
        }
    }
}
