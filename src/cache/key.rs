//! Cache key derivation

use crate::core::{settings::Settings, step::StepDefinition};
use crate::store::{canonical_digest, ArtifactId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic digest identifying a node's work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a key read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An input as the cache sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub artifact: ArtifactId,

    /// Cache key of the producing node; `None` for literals
    pub lineage: Option<CacheKey>,
}

impl ResolvedInput {
    pub fn literal(artifact: ArtifactId) -> Self {
        Self {
            artifact,
            lineage: None,
        }
    }

    pub fn upstream(artifact: ArtifactId, lineage: CacheKey) -> Self {
        Self {
            artifact,
            lineage: Some(lineage),
        }
    }
}

/// Derive the cache key for one node.
///
/// Covers the step identity and fingerprint, every input's artifact id and
/// producer key, and the merged settings.
pub fn compute_cache_key(
    step: &StepDefinition,
    inputs: &BTreeMap<String, ResolvedInput>,
    settings: &Settings,
) -> CacheKey {
    let inputs: Map<String, Value> = inputs
        .iter()
        .map(|(name, input)| {
            (
                name.clone(),
                json!({
                    "artifact": input.artifact.as_str(),
                    "lineage": input.lineage.as_ref().map(CacheKey::as_str),
                }),
            )
        })
        .collect();

    let material = json!({
        "step": step.name,
        "fingerprint": step.fingerprint,
        "inputs": inputs,
        "settings": settings.to_value(),
    });

    CacheKey(canonical_digest(&material))
}
