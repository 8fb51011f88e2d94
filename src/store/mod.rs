//! Content-addressed artifact store and cache index

pub mod canonical;

use crate::cache::CacheKey;
use crate::core::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::RwLock;

pub use canonical::{canonical_digest, to_canonical_json};

/// A typed value passed between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    /// Semantic type name
    pub ty: String,
    pub value: Value,
}

impl TypedValue {
    pub fn new(ty: impl Into<String>, value: Value) -> Self {
        Self {
            ty: ty.into(),
            value,
        }
    }
}

/// Content-derived artifact identity (`sha256:<hex>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// The id a store assigns to `value`
    pub fn for_value(value: &TypedValue) -> Self {
        let material = json!({ "type": value.ty, "value": value.value });
        ArtifactId(format!("sha256:{}", canonical_digest(&material)))
    }

    /// Wrap an id read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        ArtifactId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        &hex[..hex.len().min(12)]
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output name -> artifact id for one node
pub type OutputArtifacts = BTreeMap<String, ArtifactId>;

/// Immutable, content-addressed persistence for typed values
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a value and return its id. Writing identical content twice
    /// returns the same id and leaves the stored artifact unchanged.
    async fn put(&self, value: TypedValue) -> Result<ArtifactId, StoreError>;

    async fn get(&self, id: &ArtifactId) -> Result<TypedValue, StoreError>;

    async fn contains(&self, id: &ArtifactId) -> Result<bool, StoreError>;
}

/// Maps cache keys to the artifacts a node produced under that key
#[async_trait]
pub trait CacheIndex: Send + Sync {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<OutputArtifacts>, StoreError>;

    async fn record(&self, key: &CacheKey, outputs: &OutputArtifacts) -> Result<(), StoreError>;
}

/// In-memory store (for testing or ephemeral runs)
pub struct InMemoryStore {
    artifacts: RwLock<HashMap<ArtifactId, TypedValue>>,
    cache: RwLock<HashMap<CacheKey, OutputArtifacts>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored artifacts
    pub async fn artifact_count(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// Number of cache index entries
    pub async fn cache_entry_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Drop a single artifact, simulating external garbage collection
    pub async fn evict(&self, id: &ArtifactId) -> bool {
        self.artifacts.write().await.remove(id).is_some()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn put(&self, value: TypedValue) -> Result<ArtifactId, StoreError> {
        let id = ArtifactId::for_value(&value);
        let mut artifacts = self.artifacts.write().await;
        artifacts.entry(id.clone()).or_insert(value);
        Ok(id)
    }

    async fn get(&self, id: &ArtifactId) -> Result<TypedValue, StoreError> {
        let artifacts = self.artifacts.read().await;
        artifacts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn contains(&self, id: &ArtifactId) -> Result<bool, StoreError> {
        Ok(self.artifacts.read().await.contains_key(id))
    }
}

#[async_trait]
impl CacheIndex for InMemoryStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<OutputArtifacts>, StoreError> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn record(&self, key: &CacheKey, outputs: &OutputArtifacts) -> Result<(), StoreError> {
        self.cache.write().await.insert(key.clone(), outputs.clone());
        Ok(())
    }
}
