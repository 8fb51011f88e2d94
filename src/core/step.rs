//! Step domain model

use crate::core::{
    context::StepContext,
    error::{RegistryError, StepError},
    settings::Settings,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Wildcard semantic type, compatible with every other type
pub const ANY_TYPE: &str = "any";

/// Whether two declared semantic types may be bound together
pub fn types_compatible(produced: &str, expected: &str) -> bool {
    produced == expected || produced == ANY_TYPE || expected == ANY_TYPE
}

/// Step, output, parameter and invocation names share one identifier syntax
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name))
}

/// Declared input of a step (or parameter of a pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    /// Semantic type name, e.g. "DataFrame" or "float"
    #[serde(rename = "type", default = "any_type")]
    pub ty: String,

    /// Used when nothing is bound
    #[serde(default)]
    pub default: Option<Value>,
}

fn any_type() -> String {
    ANY_TYPE.to_string()
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declared output of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,

    #[serde(rename = "type", default = "any_type")]
    pub ty: String,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Whether a step's outputs may be reused across runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    Cacheable,
    NeverCache,
}

/// Registers one output of a step as a named model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBinding {
    /// Model name in the registry
    pub name: String,

    /// Explicit version; `None` lets the registry assign the next one
    #[serde(default)]
    pub version: Option<String>,

    /// Output holding the trained model
    pub output: String,
}

/// What a step body returns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Values for declared outputs, by output name
    pub outputs: BTreeMap<String, Value>,

    /// Scalar metrics/parameters for the experiment tracker
    pub metrics: Vec<(String, Value)>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metrics.push((key.into(), value));
        self
    }
}

/// User logic behind a step
#[async_trait]
pub trait StepBody: Send + Sync {
    async fn invoke(
        &self,
        ctx: &StepContext,
        inputs: BTreeMap<String, Value>,
    ) -> Result<StepOutput, StepError>;
}

/// Adapts a plain synchronous function into a step body
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F> StepBody for FnStep<F>
where
    F: Fn(&StepContext, BTreeMap<String, Value>) -> Result<StepOutput, StepError> + Send + Sync,
{
    async fn invoke(
        &self,
        ctx: &StepContext,
        inputs: BTreeMap<String, Value>,
    ) -> Result<StepOutput, StepError> {
        (self.0)(ctx, inputs)
    }
}

/// An immutable, registered step
#[derive(Clone)]
pub struct StepDefinition {
    /// Stable step identity
    pub name: String,

    /// Code/version fingerprint; changing it invalidates cached outputs
    pub fingerprint: String,

    pub inputs: Vec<ParamSpec>,
    pub outputs: Vec<OutputSpec>,
    pub cache_policy: CachePolicy,
    pub settings: Settings,

    /// Retry budget; falls back to the run default when unset
    pub retries: Option<usize>,

    /// Name of the experiment tracker metrics go to
    pub experiment_tracker: Option<String>,

    pub model: Option<ModelBinding>,

    pub body: Arc<dyn StepBody>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("cache_policy", &self.cache_policy)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl StepDefinition {
    pub fn builder(name: impl Into<String>, body: impl StepBody + 'static) -> StepBuilder {
        StepBuilder::new(name, Arc::new(body))
    }

    pub fn input(&self, name: &str) -> Option<&ParamSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_policy == CachePolicy::Cacheable
    }
}

/// Builder for [`StepDefinition`]
pub struct StepBuilder {
    def: StepDefinition,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>, body: Arc<dyn StepBody>) -> Self {
        Self {
            def: StepDefinition {
                name: name.into(),
                fingerprint: "1".to_string(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                cache_policy: CachePolicy::default(),
                settings: Settings::new(),
                retries: None,
                experiment_tracker: None,
                model: None,
                body,
            },
        }
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.def.fingerprint = fingerprint.into();
        self
    }

    pub fn input(mut self, spec: ParamSpec) -> Self {
        self.def.inputs.push(spec);
        self
    }

    pub fn output(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.def.outputs.push(OutputSpec::new(name, ty));
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.def.cache_policy = policy;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.def.settings = settings;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.def.retries = Some(retries);
        self
    }

    pub fn experiment_tracker(mut self, tracker: impl Into<String>) -> Self {
        self.def.experiment_tracker = Some(tracker.into());
        self
    }

    pub fn model(mut self, binding: ModelBinding) -> Self {
        self.def.model = Some(binding);
        self
    }

    pub fn build(self) -> Result<StepDefinition, RegistryError> {
        let def = self.def;

        if !is_valid_identifier(&def.name) {
            return Err(RegistryError::InvalidName(def.name));
        }

        let mut seen = HashSet::new();
        for name in def.inputs.iter().map(|p| &p.name) {
            if !is_valid_identifier(name) {
                return Err(RegistryError::InvalidName(name.clone()));
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateSpec {
                    step: def.name.clone(),
                    name: name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for name in def.outputs.iter().map(|o| &o.name) {
            if !is_valid_identifier(name) {
                return Err(RegistryError::InvalidName(name.clone()));
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateSpec {
                    step: def.name.clone(),
                    name: name.clone(),
                });
            }
        }

        if let Some(model) = &def.model {
            if def.output(&model.output).is_none() {
                return Err(RegistryError::UnknownModelOutput {
                    step: def.name.clone(),
                    output: model.output.clone(),
                });
            }
        }

        Ok(def)
    }
}
