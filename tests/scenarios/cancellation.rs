//! Test: Cancellation - a cancelled run stops dispatching and drains

use crate::helpers::*;
use orchestra::core::{NodeState, Pipeline, RunStatus};
use orchestra::execution::{CancellationHandle, RunConfig};
use orchestra::store::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_cancel_in_flight_run() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("hang").behavior(Behavior::Hang).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );
    let mut pipeline = Pipeline::new("hanging");
    pipeline.invoke("hang", []);
    pipeline.invoke("unary", [("x", out("hang"))]);

    let cancel = CancellationHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run_with(&pipeline, &no_params(), &RunConfig::default(), &cancel),
    )
    .await
    .expect("cancelled run did not finish")
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_node(&report, "hang", NodeState::Failed);
    assert_eq!(error_of(&report, "hang"), "cancelled");
    assert_node(&report, "unary", NodeState::Failed);
    assert_eq!(probe.calls("unary"), 0);
}

#[tokio::test]
async fn test_queued_nodes_are_never_dispatched() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("hang").behavior(Behavior::Hang).build(&probe),
            step("ok").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );
    let mut pipeline = Pipeline::new("queued");
    pipeline.invoke("hang", []);
    pipeline.invoke("ok", []);
    pipeline.invoke("ok", []);

    let cancel = CancellationHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let config = RunConfig {
        concurrency: 1,
        ..RunConfig::default()
    };
    let report = orch
        .run_with(&pipeline, &no_params(), &config, &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(probe.order(), vec!["hang"]);
    for id in ["ok", "ok_2"] {
        assert_eq!(error_of(&report, id), "cancelled");
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let probe = Probe::new();
    let orch = orchestrator(registry(training_steps(&probe)), &Arc::new(InMemoryStore::new()));
    let cancel = CancellationHandle::new();
    cancel.cancel();

    let report = orch
        .run_with(&training_pipeline(), &no_params(), &RunConfig::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.count(NodeState::Failed), 3);
    assert_eq!(probe.total_calls(), 0);
}
