//! Test: Build Errors - malformed pipelines fail before anything runs

use crate::helpers::*;
use orchestra::core::{
    Binding, BuildError, FnStep, OrchestratorError, ParamSpec, Pipeline, StepContext,
    StepDefinition, StepError, StepOutput,
};
use orchestra::store::InMemoryStore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

async fn build_error(pipeline: &Pipeline, probe: &Probe) -> BuildError {
    let orch = orchestrator(registry(training_steps(probe)), &Arc::new(InMemoryStore::new()));
    match orch.run(pipeline, &no_params()).await {
        Err(OrchestratorError::Build(e)) => e,
        Err(other) => panic!("unexpected error {}", other),
        Ok(report) => panic!("pipeline ran: {:?}", report.status),
    }
}

#[tokio::test]
async fn test_cycle_is_reported_with_path() {
    let probe = Probe::new();
    let mut pipeline = Pipeline::new("cyclic");
    pipeline.invoke("load", []);
    pipeline.invoke("train", [("data", out("evaluate")), ("c", Binding::literal(1))]);
    pipeline.invoke("evaluate", [("model", out("train")), ("data", out("load"))]);

    let err = build_error(&pipeline, &probe).await;
    assert!(matches!(err, BuildError::Cycle { .. }), "{}", err);
    assert!(err.to_string().contains("train -> evaluate -> train"), "{}", err);
    assert_eq!(probe.total_calls(), 0);
}

#[tokio::test]
async fn test_unknown_step() {
    let probe = Probe::new();
    let mut pipeline = Pipeline::new("typo");
    pipeline.invoke("laod", []);

    assert_eq!(
        build_error(&pipeline, &probe).await,
        BuildError::UnknownStep {
            invocation: "laod".to_string(),
            step: "laod".to_string(),
        }
    );
}

#[tokio::test]
async fn test_forward_reference() {
    let probe = Probe::new();
    let mut pipeline = Pipeline::new("forward");
    pipeline.invoke("train", [("data", out("load")), ("c", Binding::literal(1))]);
    pipeline.invoke("load", []);

    let err = build_error(&pipeline, &probe).await;
    assert!(matches!(err, BuildError::UnresolvedBinding { ref input, .. } if input == "data"), "{}", err);
}

#[tokio::test]
async fn test_missing_parameter_without_default() {
    let probe = Probe::new();
    let mut pipeline = Pipeline::new("needs_param")
        .with_parameter(ParamSpec::new("c", "int"));
    pipeline.invoke("load", []);
    pipeline.invoke("train", [("data", out("load")), ("c", Binding::parameter("c"))]);

    let err = build_error(&pipeline, &probe).await;
    assert!(matches!(err, BuildError::UnresolvedBinding { ref input, .. } if input == "c"), "{}", err);
}

#[tokio::test]
async fn test_undeclared_parameter_is_rejected() {
    let probe = Probe::new();
    let orch = orchestrator(registry(training_steps(&probe)), &Arc::new(InMemoryStore::new()));
    let mut params = no_params();
    params.insert("gamma".to_string(), json!(0.1));

    let result = orch.run(&training_pipeline(), &params).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::Build(BuildError::UnknownParameter(ref name))) if name == "gamma"
    ));
}

#[tokio::test]
async fn test_type_mismatch() {
    let probe = Probe::new();
    let mut steps = training_steps(&probe);
    steps.push(
        StepDefinition::builder(
            "describe",
            FnStep(
                |_: &StepContext, _: BTreeMap<String, Value>| -> Result<StepOutput, StepError> {
                    Ok(StepOutput::new().with_output("text", json!("hello")))
                },
            ),
        )
        .output("text", "str")
        .build()
        .unwrap(),
    );
    let orch = orchestrator(registry(steps), &Arc::new(InMemoryStore::new()));

    let mut pipeline = Pipeline::new("mismatch");
    pipeline.invoke("describe", []);
    pipeline.invoke("train", [("data", Binding::output("describe", "text")), ("c", Binding::literal(1))]);

    let result = orch.run(&pipeline, &no_params()).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::Build(BuildError::TypeMismatch { ref expected, ref found, .. }))
            if expected == "int" && found == "str"
    ));
}

#[tokio::test]
async fn test_input_default_fills_unbound_input() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![step("scaled").input_with_default("factor", 4).build(&probe)]),
        &Arc::new(InMemoryStore::new()),
    );
    let mut pipeline = Pipeline::new("defaults");
    pipeline.invoke("scaled", []);

    let report = orch.run(&pipeline, &no_params()).await.unwrap();
    assert_run_succeeded(&report);

    let mut unbound = Pipeline::new("unbound");
    unbound.invoke("train", [("c", Binding::literal(1))]);
    assert!(matches!(
        build_error(&unbound, &probe).await,
        BuildError::UnresolvedBinding { .. }
    ));
}
