//! Test: Concurrency - dispatch is bounded by the run configuration

use crate::helpers::*;
use orchestra::core::Pipeline;
use orchestra::execution::RunConfig;
use orchestra::store::InMemoryStore;
use std::sync::Arc;

fn wide(probe: &Probe, width: usize) -> (orchestra::core::StepRegistry, Pipeline) {
    let registry = registry(vec![step("slow").delay_ms(40).never_cache().build(probe)]);
    let mut pipeline = Pipeline::new("wide");
    for _ in 0..width {
        pipeline.invoke("slow", []);
    }
    (registry, pipeline)
}

async fn peak_with(concurrency: usize) -> usize {
    let probe = Probe::new();
    let (registry, pipeline) = wide(&probe, 6);
    let orch = orchestrator(registry, &Arc::new(InMemoryStore::new()));
    let config = RunConfig {
        concurrency,
        ..RunConfig::default()
    };

    let report = orch
        .run_with(&pipeline, &no_params(), &config, &Default::default())
        .await
        .unwrap();

    assert_run_succeeded(&report);
    assert_eq!(probe.total_calls(), 6);
    probe.peak()
}

#[tokio::test]
async fn test_limit_is_respected() {
    let peak = peak_with(2).await;
    assert!(peak <= 2, "peak concurrency {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_unbounded_enough_runs_all_at_once() {
    let peak = peak_with(8).await;
    assert!(peak <= 6, "peak concurrency {}", peak);
}

#[tokio::test]
async fn test_zero_is_treated_as_one() {
    assert_eq!(peak_with(0).await, 1);
}

#[tokio::test]
async fn test_sequential_preserves_declaration_order() {
    let probe = Probe::new();
    let (registry, pipeline) = wide(&probe, 4);
    let orch = orchestrator(registry, &Arc::new(InMemoryStore::new()));
    let config = RunConfig {
        concurrency: 1,
        ..RunConfig::default()
    };

    orch.run_with(&pipeline, &no_params(), &config, &Default::default())
        .await
        .unwrap();

    assert_eq!(probe.order(), vec!["slow", "slow_2", "slow_3", "slow_4"]);
}
