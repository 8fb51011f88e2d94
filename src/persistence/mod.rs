//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::state::{NodeState, RunStatus};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub pipeline: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    /// When the run finished (if it has)
    pub finished_at: Option<DateTime<Utc>>,

    /// Nodes executed successfully
    pub succeeded: usize,

    /// Nodes satisfied from cache
    pub cached: usize,

    pub failed: usize,

    pub total_nodes: usize,

    pub fatal_error: Option<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let previous = self.runs.write().await.insert(run.run_id, run.clone());

        if previous.is_none() {
            self.by_pipeline
                .write()
                .await
                .entry(run.pipeline.clone())
                .or_default()
                .push(run.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<RunSummary> = by_pipeline
            .get(pipeline)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.by_pipeline.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a run report
pub fn create_summary(report: &RunReport) -> RunSummary {
    RunSummary {
        run_id: report.run_id,
        pipeline: report.pipeline.clone(),
        status: report.status,
        started_at: report.started_at,
        finished_at: Some(report.finished_at),
        succeeded: report.count(NodeState::Succeeded),
        cached: report.count(NodeState::CacheHit),
        failed: report.count(NodeState::Failed),
        total_nodes: report.nodes.len(),
        fatal_error: report.fatal_error.clone(),
    }
}
