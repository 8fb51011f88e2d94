//! Experiment tracker sink

use crate::core::error::SinkError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Receives metrics and parameters logged by steps
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    async fn log(&self, run_id: Uuid, node_id: &str, key: &str, value: &Value)
        -> Result<(), SinkError>;
}

/// One logged metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub run_id: Uuid,
    pub node_id: String,
    pub key: String,
    pub value: Value,
}

/// Keeps every logged metric in memory
#[derive(Default)]
pub struct InMemoryTracker {
    records: Mutex<Vec<MetricRecord>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().await.clone()
    }

    /// Latest value logged for `key` in `run_id`
    pub async fn latest(&self, run_id: Uuid, key: &str) -> Option<Value> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| r.run_id == run_id && r.key == key)
            .map(|r| r.value.clone())
    }
}

#[async_trait]
impl ExperimentTracker for InMemoryTracker {
    async fn log(
        &self,
        run_id: Uuid,
        node_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), SinkError> {
        self.records.lock().await.push(MetricRecord {
            run_id,
            node_id: node_id.to_string(),
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

/// Writes metrics to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

#[async_trait]
impl ExperimentTracker for LogTracker {
    async fn log(
        &self,
        run_id: Uuid,
        node_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<(), SinkError> {
        info!(%run_id, node = node_id, "metric {} = {}", key, value);
        Ok(())
    }
}
