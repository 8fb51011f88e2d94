//! Cache resolver - decides whether a node's outputs can be reused

use crate::cache::key::{compute_cache_key, CacheKey, ResolvedInput};
use crate::core::error::CacheError;
use crate::graph::Node;
use crate::store::{ArtifactStore, CacheIndex, OutputArtifacts};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a node could not reuse cached outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Caching turned off for the run or pipeline
    Disabled,
    /// Step is marked never-cache
    NeverCache,
    /// No index entry for the key
    NotFound,
    /// Index entry exists but an artifact is gone
    MissingArtifact,
    /// Index or store errored
    Degraded,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissReason::Disabled => "caching disabled",
            MissReason::NeverCache => "never-cache step",
            MissReason::NotFound => "no cache entry",
            MissReason::MissingArtifact => "cached artifact missing",
            MissReason::Degraded => "cache unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Hit {
        key: CacheKey,
        outputs: OutputArtifacts,
    },
    Miss {
        key: CacheKey,
        reason: MissReason,
    },
}

impl CacheDecision {
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheDecision::Hit { key, .. } | CacheDecision::Miss { key, .. } => key,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheDecision::Hit { .. })
    }
}

/// Looks up and records cache entries
#[derive(Clone)]
pub struct CacheResolver {
    index: Arc<dyn CacheIndex>,
    store: Arc<dyn ArtifactStore>,
}

impl CacheResolver {
    pub fn new(index: Arc<dyn CacheIndex>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { index, store }
    }

    /// Decide hit or miss for `node` given its resolved inputs.
    ///
    /// Errors from the index or store are logged and reported as a miss.
    pub async fn resolve(
        &self,
        node: &Node,
        inputs: &BTreeMap<String, ResolvedInput>,
        enable_cache: bool,
    ) -> CacheDecision {
        let key = compute_cache_key(&node.step, inputs, &node.settings);

        if !node.step.is_cacheable() {
            return CacheDecision::Miss {
                key,
                reason: MissReason::NeverCache,
            };
        }
        if !enable_cache {
            return CacheDecision::Miss {
                key,
                reason: MissReason::Disabled,
            };
        }

        match self.lookup(node, key.clone()).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Cache lookup for {} degraded to a miss: {}", node.id, e);
                CacheDecision::Miss {
                    key,
                    reason: MissReason::Degraded,
                }
            }
        }
    }

    async fn lookup(&self, node: &Node, key: CacheKey) -> Result<CacheDecision, CacheError> {
        let outputs = match self.index.lookup(&key).await.map_err(CacheError::Index)? {
            Some(outputs) => outputs,
            None => {
                return Ok(CacheDecision::Miss {
                    key,
                    reason: MissReason::NotFound,
                })
            }
        };

        let complete = node
            .step
            .outputs
            .iter()
            .all(|spec| outputs.contains_key(&spec.name));
        if !complete {
            return Ok(CacheDecision::Miss {
                key,
                reason: MissReason::MissingArtifact,
            });
        }

        for id in outputs.values() {
            if !self.store.contains(id).await.map_err(CacheError::Store)? {
                debug!("Cached artifact {} for {} is gone", id.short(), node.id);
                return Ok(CacheDecision::Miss {
                    key,
                    reason: MissReason::MissingArtifact,
                });
            }
        }

        Ok(CacheDecision::Hit { key, outputs })
    }

    /// Record a successful node's outputs under its key
    pub async fn record(&self, key: &CacheKey, outputs: &OutputArtifacts) {
        if let Err(e) = self.index.record(key, outputs).await {
            warn!("Failed to record cache entry {}: {}", key.short(), e);
        }
    }
}
