//! Test: Backend Unavailable - losing the backend aborts the whole run

use crate::helpers::*;
use async_trait::async_trait;
use orchestra::core::{BackendError, NodeState, Pipeline, RunStatus};
use orchestra::execution::{BackendHandle, ExecutionBackend, LocalBackend, NodeSpec, Orchestrator, Outcome};
use orchestra::store::InMemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Accepts `capacity` submissions, then reports itself unavailable
struct FlakyCluster {
    inner: LocalBackend,
    capacity: usize,
    submitted: AtomicUsize,
}

#[async_trait]
impl ExecutionBackend for FlakyCluster {
    async fn submit(&self, spec: NodeSpec) -> Result<BackendHandle, BackendError> {
        if self.submitted.fetch_add(1, Ordering::SeqCst) >= self.capacity {
            return Err(BackendError::Unavailable("cluster unreachable".to_string()));
        }
        self.inner.submit(spec).await
    }

    async fn wait(&self, handle: BackendHandle) -> Result<Outcome, BackendError> {
        self.inner.wait(handle).await
    }

    async fn cancel(&self, handle: BackendHandle) -> Result<(), BackendError> {
        self.inner.cancel(handle).await
    }
}

#[tokio::test]
async fn test_unavailable_backend_aborts_run() {
    let probe = Probe::new();
    let backend = Arc::new(FlakyCluster {
        inner: LocalBackend::new(),
        capacity: 1,
        submitted: AtomicUsize::new(0),
    });
    let orch = Orchestrator::builder(registry(training_steps(&probe)))
        .storage(Arc::new(InMemoryStore::new()))
        .backend(backend)
        .build();

    let report = orch.run(&training_pipeline(), &no_params()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        report.fatal_error.as_deref(),
        Some("execution backend unavailable: cluster unreachable")
    );
    assert_node(&report, "load", NodeState::Succeeded);
    for id in ["train", "evaluate"] {
        assert_node(&report, id, NodeState::Failed);
        assert!(error_of(&report, id).starts_with("run aborted"), "{}", error_of(&report, id));
    }
}

#[tokio::test]
async fn test_closed_backend_runs_nothing() {
    let probe = Probe::new();
    let backend = Arc::new(LocalBackend::new());
    backend.close();
    let orch = Orchestrator::builder(registry(training_steps(&probe)))
        .storage(Arc::new(InMemoryStore::new()))
        .backend(backend)
        .build();

    let mut pipeline = Pipeline::new("independent");
    pipeline.invoke("load", []);
    pipeline.invoke("load", []);
    let report = orch.run(&pipeline, &no_params()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.fatal_error.is_some());
    assert_eq!(report.count(NodeState::Failed), 2);
    assert_eq!(probe.total_calls(), 0);
}
