//! Test utilities shared by the scenarios

use async_trait::async_trait;
use orchestra::core::{
    Binding, CachePolicy, ModelBinding, NodeState, ParamSpec, Pipeline, RunStatus, StepBody,
    StepContext, StepDefinition, StepError, StepOutput, StepRegistry,
};
use orchestra::execution::{Orchestrator, RunReport};
use orchestra::store::InMemoryStore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observations across every probe step of a test
#[derive(Clone, Default)]
pub struct Probe {
    log: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<BTreeMap<String, usize>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node ids in the order their attempts started
    pub fn order(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Attempts started for a node
    pub fn calls(&self, node_id: &str) -> usize {
        self.calls.lock().unwrap().get(node_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Most attempts ever running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, node_id: &str) {
        self.log.lock().unwrap().push(node_id.to_string());
        *self.calls.lock().unwrap().entry(node_id.to_string()).or_default() += 1;
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How a probe step behaves
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Output the sum of its integer inputs plus one
    Sum,
    /// Fail the first `n` attempts, then behave like `Sum`
    FailFirst(usize),
    /// Fail every attempt
    AlwaysFail,
    /// Sleep in small increments until cancelled
    Hang,
}

/// A step body that records what happened to it
pub struct ProbeStep {
    probe: Probe,
    output: Option<String>,
    behavior: Behavior,
    delay: Option<Duration>,
}

#[async_trait]
impl StepBody for ProbeStep {
    async fn invoke(
        &self,
        ctx: &StepContext,
        inputs: BTreeMap<String, Value>,
    ) -> Result<StepOutput, StepError> {
        self.probe.enter(&ctx.node_id);
        let result = self.run(ctx, inputs).await;
        self.probe.leave();
        result
    }
}

impl ProbeStep {
    async fn run(&self, ctx: &StepContext, inputs: BTreeMap<String, Value>) -> Result<StepOutput, StepError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behavior {
            Behavior::AlwaysFail => {
                return Err(StepError::Failed(format!("{} exploded", ctx.node_id)))
            }
            Behavior::FailFirst(n) if ctx.attempt <= n => {
                return Err(StepError::Failed(format!("flaky attempt {}", ctx.attempt)))
            }
            Behavior::Hang => {
                while !ctx.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                return Err(StepError::Cancelled);
            }
            _ => {}
        }

        let sum: i64 = inputs.values().filter_map(Value::as_i64).sum();
        let mut output = StepOutput::new().with_metric("sum", json!(sum));
        if let Some(name) = &self.output {
            output = output.with_output(name.clone(), json!(sum + 1));
        }
        Ok(output)
    }
}

/// Builder for probe step definitions
pub struct StepSpec {
    name: String,
    inputs: Vec<ParamSpec>,
    output: Option<String>,
    behavior: Behavior,
    delay: Option<Duration>,
    retries: Option<usize>,
    fingerprint: String,
    never_cache: bool,
    tracker: Option<String>,
    model: Option<ModelBinding>,
}

pub fn step(name: &str) -> StepSpec {
    StepSpec {
        name: name.to_string(),
        inputs: Vec::new(),
        output: Some("out".to_string()),
        behavior: Behavior::Sum,
        delay: None,
        retries: None,
        fingerprint: "1".to_string(),
        never_cache: false,
        tracker: None,
        model: None,
    }
}

impl StepSpec {
    pub fn input(mut self, name: &str) -> Self {
        self.inputs.push(ParamSpec::new(name, "int"));
        self
    }

    pub fn input_with_default(mut self, name: &str, default: i64) -> Self {
        self.inputs.push(ParamSpec::new(name, "int").with_default(json!(default)));
        self
    }

    pub fn no_output(mut self) -> Self {
        self.output = None;
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    pub fn never_cache(mut self) -> Self {
        self.never_cache = true;
        self
    }

    /// Log the step's metrics to the named tracker
    pub fn tracked_by(mut self, tracker: &str) -> Self {
        self.tracker = Some(tracker.to_string());
        self
    }

    /// Register the step's `out` output as a version of `model`
    pub fn registers_model(mut self, model: &str) -> Self {
        self.model = Some(ModelBinding {
            name: model.to_string(),
            version: None,
            output: "out".to_string(),
        });
        self
    }

    pub fn build(self, probe: &Probe) -> StepDefinition {
        let body = ProbeStep {
            probe: probe.clone(),
            output: self.output.clone(),
            behavior: self.behavior,
            delay: self.delay,
        };
        let mut builder = StepDefinition::builder(&self.name, body).fingerprint(self.fingerprint);
        for input in self.inputs {
            builder = builder.input(input);
        }
        if let Some(output) = &self.output {
            builder = builder.output(output, "int");
        }
        if let Some(retries) = self.retries {
            builder = builder.retries(retries);
        }
        if self.never_cache {
            builder = builder.cache_policy(CachePolicy::NeverCache);
        }
        if let Some(tracker) = self.tracker {
            builder = builder.experiment_tracker(tracker);
        }
        if let Some(model) = self.model {
            builder = builder.model(model);
        }
        builder.build().unwrap()
    }
}

pub fn registry(steps: Vec<StepDefinition>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    for step in steps {
        registry.register(step).unwrap();
    }
    registry
}

/// Orchestrator over an explicit store, so runs can share a cache
pub fn orchestrator(registry: StepRegistry, store: &Arc<InMemoryStore>) -> Orchestrator {
    Orchestrator::builder(registry).storage(store.clone()).build()
}

pub fn out(invocation: &str) -> Binding {
    Binding::output(invocation, "out")
}

pub fn no_params() -> BTreeMap<String, Value> {
    BTreeMap::new()
}

/// load -> train -> evaluate, with a tunable `c` parameter feeding train
pub fn training_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new("training_pipeline")
        .with_parameter(ParamSpec::new("c", "int").with_default(json!(1)));
    pipeline.invoke("load", []);
    pipeline.invoke("train", [("data", out("load")), ("c", Binding::parameter("c"))]);
    pipeline.invoke("evaluate", [("model", out("train")), ("data", out("load"))]);
    pipeline
}

pub fn training_steps(probe: &Probe) -> Vec<StepDefinition> {
    vec![
        step("load").build(probe),
        step("train").input("data").input("c").build(probe),
        step("evaluate").input("model").input("data").build(probe),
    ]
}

pub fn state_of(report: &RunReport, node_id: &str) -> NodeState {
    report
        .node(node_id)
        .unwrap_or_else(|| panic!("node {} missing from report", node_id))
        .state
}

pub fn error_of(report: &RunReport, node_id: &str) -> String {
    report
        .node(node_id)
        .and_then(|n| n.error.clone())
        .unwrap_or_else(|| panic!("node {} has no error", node_id))
}

pub fn assert_run_succeeded(report: &RunReport) {
    assert_eq!(
        report.status,
        RunStatus::Succeeded,
        "run failed: {:#?}",
        report.nodes
    );
}

pub fn assert_node(report: &RunReport, node_id: &str, state: NodeState) {
    assert_eq!(
        state_of(report, node_id),
        state,
        "unexpected state for {}: {:?}",
        node_id,
        report.node(node_id)
    );
}
