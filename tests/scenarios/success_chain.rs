//! Test: Success Chain - data flows through a DAG in dependency order

use crate::helpers::*;
use orchestra::core::{Binding, NodeState, Pipeline};
use orchestra::execution::RunConfig;
use orchestra::graph::build;
use orchestra::store::{ArtifactStore, InMemoryStore};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_training_pipeline_runs_in_order() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    let report = orch.run(&training_pipeline(), &no_params()).await.unwrap();

    assert_run_succeeded(&report);
    assert_eq!(probe.order(), vec!["load", "train", "evaluate"]);
    for id in ["load", "train", "evaluate"] {
        assert_node(&report, id, NodeState::Succeeded);
        assert_eq!(report.node(id).unwrap().attempts, 1);
    }

    // load = 1, train = 1 + c(1) + 1 = 3, evaluate = 3 + 1 + 1 = 5
    let evaluated = report.node("evaluate").unwrap().outputs.get("out").unwrap();
    assert_eq!(store.get(evaluated).await.unwrap().value, json!(5));
}

#[tokio::test]
async fn test_node_and_edge_counts() {
    let probe = Probe::new();
    let registry = registry(training_steps(&probe));

    let dag = build(&training_pipeline(), &registry, &no_params()).unwrap();

    assert_eq!(dag.len(), 3);
    // load->train, load->evaluate, train->evaluate
    assert_eq!(dag.edges().len(), 3);
    assert_eq!(dag.topological_order(), vec!["load", "train", "evaluate"]);
    assert_eq!(dag.parameters.get("c"), Some(&json!(1)));
}

#[tokio::test]
async fn test_ready_nodes_dispatch_in_declaration_order() {
    let probe = Probe::new();
    let registry = registry(vec![
        step("source").build(&probe),
        step("branch").input("x").build(&probe),
        step("join").input("a").input("b").input("c").build(&probe),
    ]);

    // source fans out to three branches declared left, middle, right
    let mut pipeline = Pipeline::new("fan_out");
    pipeline.invoke("source", []);
    pipeline.invoke_as("left", "branch", [("x", out("source"))]);
    pipeline.invoke_as("middle", "branch", [("x", out("source"))]);
    pipeline.invoke_as("right", "branch", [("x", out("source"))]);
    pipeline.invoke("join", [("a", out("left")), ("b", out("middle")), ("c", out("right"))]);

    let orch = orchestrator(registry, &Arc::new(InMemoryStore::new()));
    let config = RunConfig {
        concurrency: 1,
        ..RunConfig::default()
    };
    let report = orch
        .run_with(&pipeline, &no_params(), &config, &Default::default())
        .await
        .unwrap();

    assert_run_succeeded(&report);
    assert_eq!(probe.order(), vec!["source", "left", "middle", "right", "join"]);
}

#[tokio::test]
async fn test_parameter_override_and_literal() {
    let probe = Probe::new();
    let store = Arc::new(InMemoryStore::new());
    let orch = orchestrator(registry(training_steps(&probe)), &store);

    let mut params = no_params();
    params.insert("c".to_string(), json!(10));
    let report = orch.run(&training_pipeline(), &params).await.unwrap();

    let trained = report.node("train").unwrap().outputs.get("out").unwrap();
    assert_eq!(store.get(trained).await.unwrap().value, json!(12));

    // literals bind like any other value
    let mut pipeline = Pipeline::new("literal");
    pipeline.invoke("train", [("data", Binding::literal(40)), ("c", Binding::literal(1))]);
    let report = orch.run(&pipeline, &no_params()).await.unwrap();
    let trained = report.node("train").unwrap().outputs.get("out").unwrap();
    assert_eq!(store.get(trained).await.unwrap().value, json!(42));
}
