//! Test: Max Retries - retry budgets per step and per run

use crate::helpers::*;
use orchestra::core::{NodeState, Pipeline, RunStatus};
use orchestra::execution::{ExecutionEvent, RunConfig};
use orchestra::store::InMemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn flaky_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new("flaky");
    pipeline.invoke("flaky", []);
    pipeline.invoke("unary", [("x", out("flaky"))]);
    pipeline
}

#[tokio::test]
async fn test_flaky_step_succeeds_within_budget() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("flaky").behavior(Behavior::FailFirst(2)).retries(2).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );
    let retries = Arc::new(AtomicUsize::new(0));
    let counter = retries.clone();
    orch.add_event_handler(move |event| {
        if matches!(event, ExecutionEvent::NodeRetrying { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
    .await;

    let report = orch.run(&flaky_pipeline(), &no_params()).await.unwrap();

    assert_run_succeeded(&report);
    assert_eq!(report.node("flaky").unwrap().attempts, 3);
    assert!(report.node("flaky").unwrap().error.is_none());
    assert_eq!(probe.calls("flaky"), 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_budget_exhausted_fails_with_last_error() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("flaky").behavior(Behavior::FailFirst(2)).retries(1).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );

    let report = orch.run(&flaky_pipeline(), &no_params()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_node(&report, "flaky", NodeState::Failed);
    assert_eq!(report.node("flaky").unwrap().attempts, 2);
    assert_eq!(error_of(&report, "flaky"), "flaky attempt 2");
    assert_eq!(probe.calls("unary"), 0);
}

#[tokio::test]
async fn test_budget_of_two_allows_three_attempts_then_fails() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("flaky").behavior(Behavior::AlwaysFail).retries(2).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );

    let report = orch.run(&flaky_pipeline(), &no_params()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_node(&report, "flaky", NodeState::Failed);
    assert_eq!(report.node("flaky").unwrap().attempts, 3);
    assert_eq!(probe.calls("flaky"), 3);
    assert_eq!(error_of(&report, "flaky"), "flaky exploded");
    assert_eq!(error_of(&report, "unary"), "upstream `flaky` failed");
}

#[tokio::test]
async fn test_run_default_applies_when_step_has_no_budget() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("flaky").behavior(Behavior::FailFirst(1)).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );

    // default budget is zero
    let report = orch.run(&flaky_pipeline(), &no_params()).await.unwrap();
    assert_eq!(report.node("flaky").unwrap().attempts, 1);
    assert_eq!(report.status, RunStatus::Failed);

    let config = RunConfig {
        default_retries: 1,
        ..RunConfig::default()
    };
    let report = orch
        .run_with(&flaky_pipeline(), &no_params(), &config, &Default::default())
        .await
        .unwrap();
    assert_run_succeeded(&report);
    assert_eq!(report.node("flaky").unwrap().attempts, 2);
}

#[tokio::test]
async fn test_step_budget_overrides_run_default() {
    let probe = Probe::new();
    let orch = orchestrator(
        registry(vec![
            step("flaky").behavior(Behavior::AlwaysFail).retries(0).build(&probe),
            step("unary").input("x").build(&probe),
        ]),
        &Arc::new(InMemoryStore::new()),
    );
    let config = RunConfig {
        default_retries: 5,
        ..RunConfig::default()
    };

    let report = orch
        .run_with(&flaky_pipeline(), &no_params(), &config, &Default::default())
        .await
        .unwrap();

    assert_eq!(report.node("flaky").unwrap().attempts, 1);
    assert_eq!(probe.calls("flaky"), 1);
}
