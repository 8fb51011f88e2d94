//! Test: Failure Handling - a failure is contained to its dependents

use crate::helpers::*;
use orchestra::core::{NodeState, Pipeline, RunStatus};
use orchestra::execution::ExecutionEvent;
use orchestra::store::InMemoryStore;
use std::sync::{Arc, Mutex};

/// root -> (left, right) -> join, plus an unrelated `side` node
fn diamond() -> Pipeline {
    let mut pipeline = Pipeline::new("diamond");
    pipeline.invoke_as("root", "ok", []);
    pipeline.invoke_as("left", "broken", [("x", out("root"))]);
    pipeline.invoke_as("right", "unary", [("x", out("root"))]);
    pipeline.invoke_as("join", "binary", [("a", out("left")), ("b", out("right"))]);
    pipeline.invoke_as("after_join", "unary", [("x", out("join"))]);
    pipeline.invoke_as("side", "ok", []);
    pipeline
}

fn steps(probe: &Probe) -> Vec<orchestra::core::StepDefinition> {
    vec![
        step("ok").build(probe),
        step("unary").input("x").build(probe),
        step("binary").input("a").input("b").build(probe),
        step("broken").input("x").behavior(Behavior::AlwaysFail).build(probe),
    ]
}

#[tokio::test]
async fn test_diamond_failure_is_contained() {
    let probe = Probe::new();
    let orch = orchestrator(registry(steps(&probe)), &Arc::new(InMemoryStore::new()));

    let report = orch.run(&diamond(), &no_params()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.fatal_error.is_none());

    assert_node(&report, "root", NodeState::Succeeded);
    assert_node(&report, "right", NodeState::Succeeded);
    assert_node(&report, "side", NodeState::Succeeded);

    assert_node(&report, "left", NodeState::Failed);
    assert_eq!(error_of(&report, "left"), "left exploded");
    assert_eq!(report.node("left").unwrap().attempts, 1);

    for id in ["join", "after_join"] {
        assert_node(&report, id, NodeState::Failed);
        assert_eq!(error_of(&report, id), "upstream `left` failed");
        assert_eq!(report.node(id).unwrap().attempts, 0);
        assert_eq!(probe.calls(id), 0);
    }
}

#[tokio::test]
async fn test_failed_events_name_root_cause() {
    let probe = Probe::new();
    let orch = orchestrator(registry(steps(&probe)), &Arc::new(InMemoryStore::new()));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let seen = failures.clone();
    orch.add_event_handler(move |event| {
        if let ExecutionEvent::NodeFailed { node_id, error } = event {
            seen.lock().unwrap().push((node_id, error));
        }
    })
    .await;

    orch.run(&diamond(), &no_params()).await.unwrap();

    let failures = failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 3);
    assert_eq!(failures[0], ("left".to_string(), "left exploded".to_string()));
    assert!(failures[1..]
        .iter()
        .all(|(_, error)| error == "upstream `left` failed"));
}

#[tokio::test]
async fn test_outputs_of_succeeded_nodes_survive_failure() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(steps(&probe)), &store);

    orch.run(&diamond(), &no_params()).await.unwrap();
    let report = orch.run(&diamond(), &no_params()).await.unwrap();

    // committed before `left` failed, so the second run reuses them
    assert_node(&report, "root", NodeState::CacheHit);
    assert_node(&report, "right", NodeState::CacheHit);
    assert_node(&report, "side", NodeState::CacheHit);
    assert_eq!(probe.calls("left"), 2);
}

#[tokio::test]
async fn test_missing_declared_output_fails_node() {
    let probe = Probe::new();
    let mut silent = step("silent").no_output().build(&probe);
    // declares an output the body never produces
    silent = orchestra::core::StepDefinition {
        outputs: vec![orchestra::core::OutputSpec::new("out", "int")],
        ..silent
    };
    let orch = orchestrator(
        registry(vec![silent, step("unary").input("x").build(&probe)]),
        &Arc::new(InMemoryStore::new()),
    );

    let mut pipeline = Pipeline::new("silent");
    pipeline.invoke("silent", []);
    pipeline.invoke("unary", [("x", out("silent"))]);
    let report = orch.run(&pipeline, &no_params()).await.unwrap();

    assert_eq!(error_of(&report, "silent"), "step did not produce declared output 'out'");
    assert_eq!(error_of(&report, "unary"), "upstream `silent` failed");
}
