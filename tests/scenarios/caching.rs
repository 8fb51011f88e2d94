//! Test: Caching - reuse of outputs across runs and transitive invalidation

use crate::helpers::*;
use orchestra::core::{NodeState, Pipeline};
use orchestra::execution::RunConfig;
use orchestra::store::InMemoryStore;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_rerun_is_fully_cached() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    let first = orch.run(&training_pipeline(), &no_params()).await.unwrap();
    let second = orch.run(&training_pipeline(), &no_params()).await.unwrap();

    assert_run_succeeded(&second);
    assert_eq!(probe.total_calls(), 3);
    for id in ["load", "train", "evaluate"] {
        assert_node(&second, id, NodeState::CacheHit);
        let (a, b) = (first.node(id).unwrap(), second.node(id).unwrap());
        assert_eq!(b.attempts, 0);
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.outputs, b.outputs);
    }
}

#[tokio::test]
async fn test_parameter_change_invalidates_downstream_only() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    orch.run(&training_pipeline(), &no_params()).await.unwrap();

    let mut params = no_params();
    params.insert("c".to_string(), json!(2));
    let report = orch.run(&training_pipeline(), &params).await.unwrap();

    assert_run_succeeded(&report);
    assert_node(&report, "load", NodeState::CacheHit);
    assert_node(&report, "train", NodeState::Succeeded);
    assert_node(&report, "evaluate", NodeState::Succeeded);
    assert_eq!(probe.calls("load"), 1);
    assert_eq!(probe.calls("train"), 2);
    assert_eq!(probe.calls("evaluate"), 2);
}

#[tokio::test]
async fn test_fingerprint_change_invalidates_transitively() {
    let store = Arc::new(InMemoryStore::new());

    let before = Probe::new();
    orchestrator(registry(training_steps(&before)), &store)
        .run(&training_pipeline(), &no_params())
        .await
        .unwrap();

    // new code for train produces the same value, so evaluate sees the same
    // artifact; only the upstream lineage differs
    let after = Probe::new();
    let steps = vec![
        step("load").build(&after),
        step("train").input("data").input("c").fingerprint("2").build(&after),
        step("evaluate").input("model").input("data").build(&after),
    ];
    let report = orchestrator(registry(steps), &store)
        .run(&training_pipeline(), &no_params())
        .await
        .unwrap();

    assert_node(&report, "load", NodeState::CacheHit);
    assert_node(&report, "train", NodeState::Succeeded);
    assert_node(&report, "evaluate", NodeState::Succeeded);
    assert_eq!(after.order(), vec!["train", "evaluate"]);
}

#[tokio::test]
async fn test_never_cache_step_always_runs() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(
        registry(vec![
            step("load").build(&probe),
            step("sample").input("data").never_cache().build(&probe),
        ]),
        &store,
    );
    let mut pipeline = Pipeline::new("sampling");
    pipeline.invoke("load", []);
    pipeline.invoke("sample", [("data", out("load"))]);

    orch.run(&pipeline, &no_params()).await.unwrap();
    let report = orch.run(&pipeline, &no_params()).await.unwrap();

    assert_node(&report, "load", NodeState::CacheHit);
    assert_node(&report, "sample", NodeState::Succeeded);
    assert_eq!(probe.calls("sample"), 2);
    assert_eq!(store.cache_entry_count().await, 1);
}

#[tokio::test]
async fn test_disabled_cache_runs_everything() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    orch.run(&training_pipeline(), &no_params()).await.unwrap();

    let uncached = training_pipeline().with_cache(false);
    let report = orch.run(&uncached, &no_params()).await.unwrap();
    assert_eq!(report.count(NodeState::Succeeded), 3);

    let config = RunConfig {
        enable_cache: false,
        ..RunConfig::default()
    };
    let report = orch
        .run_with(&training_pipeline(), &no_params(), &config, &Default::default())
        .await
        .unwrap();
    assert_eq!(report.count(NodeState::Succeeded), 3);
    assert_eq!(probe.total_calls(), 9);
}

#[tokio::test]
async fn test_evicted_artifact_forces_rerun() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    let first = orch.run(&training_pipeline(), &no_params()).await.unwrap();
    let evaluated = first.node("evaluate").unwrap().outputs.get("out").unwrap().clone();
    assert!(store.evict(&evaluated).await);

    let report = orch.run(&training_pipeline(), &no_params()).await.unwrap();
    assert_node(&report, "load", NodeState::CacheHit);
    assert_node(&report, "train", NodeState::CacheHit);
    assert_node(&report, "evaluate", NodeState::Succeeded);
    assert_eq!(report.node("evaluate").unwrap().outputs.get("out"), Some(&evaluated));
}
