//! Test: Scheduling - cron schedules trigger runs through the orchestrator

use crate::helpers::*;
use chrono::{DateTime, TimeZone, Utc};
use orchestra::core::NodeState;
use orchestra::execution::Orchestrator;
use orchestra::persistence::{InMemoryPersistence, PersistenceBackend};
use orchestra::schedule::{Schedule, ScheduleRunner, ScheduleTranslator};
use orchestra::store::InMemoryStore;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

async fn runner_with(schedule: Schedule) -> (ScheduleRunner, Probe, Arc<InMemoryPersistence>) {
    let probe = Probe::new();
    let history = Arc::new(InMemoryPersistence::new());
    let orch = Orchestrator::builder(registry(training_steps(&probe)))
        .storage(Arc::new(InMemoryStore::new()))
        .history(history.clone())
        .build();
    orch.register_pipeline(training_pipeline()).await;

    let mut translator = ScheduleTranslator::new();
    translator.register(schedule).unwrap();
    let runner = ScheduleRunner::new(Arc::new(Mutex::new(translator)), Arc::new(orch));
    (runner, probe, history)
}

#[tokio::test]
async fn test_every_ten_minutes_for_an_hour() {
    let (runner, probe, history) =
        runner_with(Schedule::new("retrain", "*/10 * * * *", "training_pipeline")).await;

    let mut reports = Vec::new();
    for minute in 0..60 {
        for result in runner.fire(at(9, minute)).await {
            reports.push(result.unwrap());
        }
    }

    assert_eq!(reports.len(), 6);
    assert!(reports.iter().all(|r| r.is_success()));
    // identical parameters, so only the first run executes anything
    assert_eq!(probe.total_calls(), 3);
    assert_eq!(reports[5].count(NodeState::CacheHit), 3);
    assert_eq!(history.list_runs("training_pipeline").await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_schedule_parameters_reach_the_run() {
    let (runner, probe, _) = runner_with(
        Schedule::new("nightly", "30 2 * * *", "training_pipeline").with_parameter("c", json!(7)),
    )
    .await;

    assert!(runner.fire(at(2, 29)).await.is_empty());
    let results = runner.fire(at(2, 30)).await;
    assert_eq!(results.len(), 1);
    let report = results.into_iter().next().unwrap().unwrap();
    assert!(report.is_success());
    assert_eq!(probe.calls("train"), 1);

    // the same minute never fires twice
    assert!(runner.fire(at(2, 30)).await.is_empty());
}

#[tokio::test]
async fn test_unknown_pipeline_is_reported() {
    let (runner, probe, _) =
        runner_with(Schedule::new("orphan", "* * * * *", "missing_pipeline")).await;

    let results = runner.fire(at(0, 0)).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
    assert_eq!(probe.total_calls(), 0);
}
