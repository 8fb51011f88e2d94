//! Layered settings bundles
//!
//! A `Settings` bundle maps a settings category (`docker`, `orchestrator`,
//! `experiment_tracker`, ...) to an arbitrary JSON value. Steps and pipelines
//! each carry one; the effective bundle for a node is `merge(step, pipeline)`,
//! where the pipeline wins per top-level key. The merge is shallow: a pipeline
//! `orchestrator` entry replaces the step's `orchestrator` entry wholesale.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Container build settings key
pub const DOCKER: &str = "docker";
/// Cluster orchestrator settings key
pub const ORCHESTRATOR: &str = "orchestrator";
/// Experiment tracker settings key
pub const EXPERIMENT_TRACKER: &str = "experiment_tracker";

/// A settings bundle keyed by category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw value, replacing any previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Builder-style typed insert
    pub fn with<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self, serde_json::Error> {
        self.0.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Deserialize one category into its typed view
    pub fn typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.0
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    pub fn docker(&self) -> Result<Option<DockerSettings>, serde_json::Error> {
        self.typed(DOCKER)
    }

    pub fn orchestrator(&self) -> Result<Option<OrchestratorSettings>, serde_json::Error> {
        self.typed(ORCHESTRATOR)
    }

    pub fn experiment_tracker(&self) -> Result<Option<TrackerSettings>, serde_json::Error> {
        self.typed(EXPERIMENT_TRACKER)
    }

    /// Shallow merge: every key in `overrides` replaces the key in `base`
    pub fn merge(base: &Settings, overrides: &Settings) -> Settings {
        let mut merged = base.0.clone();
        for (key, value) in &overrides.0 {
            merged.insert(key.clone(), value.clone());
        }
        Settings(merged)
    }

    /// Check that every known category parses into its typed view
    pub fn validate(&self) -> Result<(), String> {
        self.docker().map_err(|e| format!("{}: {}", DOCKER, e))?;
        self.orchestrator().map_err(|e| format!("{}: {}", ORCHESTRATOR, e))?;
        self.experiment_tracker()
            .map_err(|e| format!("{}: {}", EXPERIMENT_TRACKER, e))?;
        Ok(())
    }

    /// The bundle as a JSON object (used for cache keys)
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// The execution-relevant slice handed to a backend
    pub fn execution(&self) -> ExecutionSettings {
        let docker = self.docker().ok().flatten().unwrap_or_default();
        let orchestrator = self.orchestrator().ok().flatten().unwrap_or_default();
        ExecutionSettings {
            image: docker.image.or(docker.parent_image),
            resources: orchestrator.resources,
            service_account: orchestrator.service_account_name,
        }
    }
}

impl FromIterator<(String, Value)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Settings(iter.into_iter().collect())
    }
}

/// Python package installer used inside built images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageInstaller {
    Pip,
    Uv,
}

/// Container image settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Prebuilt image to run in, skipping any build
    pub image: Option<String>,
    pub parent_image: Option<String>,
    pub python_package_installer: Option<PackageInstaller>,
    pub pyproject_path: Option<String>,
    pub prevent_build_reuse: bool,
    /// Free-form build options, e.g. `{"platform": "linux/amd64"}`
    pub build_options: BTreeMap<String, Value>,
}

/// CPU/memory quantities in cluster notation ("1", "500m", "2Gi")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

/// Cluster orchestrator settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub resources: ResourceRequirements,
    pub service_account_name: Option<String>,
}

/// Experiment tracker settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub experiment_name: Option<String>,
    pub nested: bool,
    pub tags: BTreeMap<String, String>,
}

/// What a backend needs to place a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    pub image: Option<String>,
    pub resources: ResourceRequirements,
    pub service_account: Option<String>,
}
