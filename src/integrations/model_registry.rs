//! Model registry sink

use crate::core::error::SinkError;
use crate::store::ArtifactId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Records trained-model artifacts as named versions
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Register `artifact` under `name`. With no explicit version the
    /// registry picks the next one. Returns the version used.
    async fn register(
        &self,
        name: &str,
        version: Option<&str>,
        artifact: &ArtifactId,
    ) -> Result<String, SinkError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelVersion {
    pub version: String,
    pub artifact: ArtifactId,
    pub registered_at: DateTime<Utc>,
}

/// In-memory registry with numbered versions ("1", "2", ...)
#[derive(Default)]
pub struct InMemoryModelRegistry {
    models: Mutex<HashMap<String, Vec<ModelVersion>>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn versions(&self, name: &str) -> Vec<ModelVersion> {
        self.models
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn register(
        &self,
        name: &str,
        version: Option<&str>,
        artifact: &ArtifactId,
    ) -> Result<String, SinkError> {
        let mut models = self.models.lock().await;
        let versions = models.entry(name.to_string()).or_default();

        let version = match version {
            Some(v) => {
                if let Some(existing) = versions.iter().find(|m| m.version == v) {
                    if &existing.artifact == artifact {
                        return Ok(existing.version.clone());
                    }
                    return Err(SinkError::Rejected {
                        key: format!("{}:{}", name, v),
                        reason: "version already registered for a different artifact".to_string(),
                    });
                }
                v.to_string()
            }
            None => (versions.len() + 1).to_string(),
        };

        versions.push(ModelVersion {
            version: version.clone(),
            artifact: artifact.clone(),
            registered_at: Utc::now(),
        });
        Ok(version)
    }
}
