//! Pipeline configuration from YAML
//!
//! A pipeline file declares command steps, the invocations that wire them
//! together, and optionally a cron schedule:
//!
//! ```yaml
//! name: training_pipeline
//! parameters:
//!   - { name: penalty, type: str, default: l2 }
//! steps:
//!   - name: load_data
//!     command: python load.py
//!     outputs: [{ name: data, type: DataFrame }]
//!   - name: train_model
//!     command: "python train.py --penalty {{ inputs.penalty }}"
//!     inputs: [{ name: data, type: DataFrame }, { name: penalty, type: str }]
//!     outputs: [{ name: model, type: ClassifierMixin }]
//! invocations:
//!   - step: load_data
//!   - step: train_model
//!     with:
//!       data: { output: load_data.data }
//!       penalty: { parameter: penalty }
//! schedule:
//!   cron: "*/10 * * * *"
//! ```

use crate::core::{
    pipeline::{Binding, Pipeline},
    registry::StepRegistry,
    settings::Settings,
    step::{CachePolicy, ModelBinding, OutputSpec, ParamSpec, StepDefinition},
};
use crate::execution::{command::CommandStep, RunConfig};
use crate::schedule::Schedule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Declared pipeline parameters
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,

    /// Pipeline-level settings; override step settings per key
    #[serde(default)]
    pub settings: Settings,

    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Default retry budget for steps that do not set their own
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Maximum concurrently dispatched nodes
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Step definitions
    pub steps: Vec<StepConfig>,

    /// Step invocations in execution-declaration order
    pub invocations: Vec<InvocationConfig>,

    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

/// A command step as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    /// Shell command; see [`CommandStep`] for placeholders
    pub command: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub inputs: Vec<ParamSpec>,

    #[serde(default)]
    pub outputs: Vec<OutputSpec>,

    /// Whether outputs may be reused across runs
    #[serde(default = "default_true")]
    pub cache: bool,

    #[serde(default)]
    pub retries: Option<usize>,

    /// Bump to invalidate cached outputs after changing the command
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub experiment_tracker: Option<String>,

    #[serde(default)]
    pub model: Option<ModelBinding>,

    #[serde(default)]
    pub settings: Settings,
}

/// One use of a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    pub step: String,

    /// Defaults to the step name, suffixed on repeats
    #[serde(default)]
    pub id: Option<String>,

    /// Input bindings
    #[serde(default, rename = "with")]
    pub bindings: BTreeMap<String, BindingConfig>,
}

/// Binding as written in YAML. Anything that is not one of the tagged
/// forms is a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingConfig {
    /// `{ output: "invocation.output" }`
    Output { output: String },
    /// `{ parameter: name }`
    Parameter { parameter: String },
    /// `{ literal: value }`, for values that would otherwise look like a tag
    Literal { literal: Value },
    Value(Value),
}

impl BindingConfig {
    fn to_binding(&self) -> Result<Binding> {
        Ok(match self {
            BindingConfig::Output { output } => {
                let (invocation, name) = output.split_once('.').with_context(|| {
                    format!("Output reference '{}' must be 'invocation.output'", output)
                })?;
                Binding::output(invocation, name)
            }
            BindingConfig::Parameter { parameter } => Binding::parameter(parameter.clone()),
            BindingConfig::Literal { literal } => Binding::Literal(literal.clone()),
            BindingConfig::Value(value) => Binding::Literal(value.clone()),
        })
    }
}

/// Cron schedule for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Defaults to the pipeline name
    #[serde(default)]
    pub name: Option<String>,

    pub cron: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    #[serde(default)]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Binding resolution and type checks happen when the
    /// pipeline is built against the registry.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            if step.command.trim().is_empty() {
                anyhow::bail!("Step '{}' has an empty command", step.name);
            }
        }

        for invocation in &self.invocations {
            if !seen.contains(&invocation.step) {
                anyhow::bail!(
                    "Invocation of non-existent step '{}'",
                    invocation.step
                );
            }
            for binding in invocation.bindings.values() {
                binding.to_binding()?;
            }
        }

        if let Some(schedule) = &self.schedule {
            if schedule.cron.trim().is_empty() {
                anyhow::bail!("Schedule for '{}' has an empty cron expression", self.name);
            }
        }

        Ok(())
    }

    /// Register every step as a [`CommandStep`]
    pub fn to_registry(&self) -> Result<StepRegistry> {
        let mut registry = StepRegistry::new();

        for step in &self.steps {
            let mut body = CommandStep::new(&step.command);
            if let Some(timeout) = step.timeout_secs {
                body = body.with_timeout(timeout);
            }

            let mut builder = StepDefinition::builder(&step.name, body)
                .cache_policy(if step.cache {
                    CachePolicy::Cacheable
                } else {
                    CachePolicy::NeverCache
                })
                .settings(step.settings.clone())
                // the command text is part of the step identity
                .fingerprint(format!(
                    "{}:{}",
                    step.version.as_deref().unwrap_or("1"),
                    step.command
                ));

            for input in &step.inputs {
                builder = builder.input(input.clone());
            }
            for output in &step.outputs {
                builder = builder.output(&output.name, &output.ty);
            }
            if let Some(retries) = step.retries {
                builder = builder.retries(retries);
            }
            if let Some(tracker) = &step.experiment_tracker {
                builder = builder.experiment_tracker(tracker);
            }
            if let Some(model) = &step.model {
                builder = builder.model(model.clone());
            }

            let definition = builder
                .build()
                .with_context(|| format!("Invalid step '{}'", step.name))?;
            registry.register(definition)?;
        }

        Ok(registry)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(&self.name)
            .with_settings(self.settings.clone())
            .with_cache(self.enable_cache);
        pipeline.parameters = self.parameters.clone();

        for invocation in &self.invocations {
            let bindings = invocation
                .bindings
                .iter()
                .map(|(name, binding)| Ok((name.as_str(), binding.to_binding()?)))
                .collect::<Result<Vec<_>>>()?;

            match &invocation.id {
                Some(id) => pipeline.invoke_as(id, &invocation.step, bindings),
                None => {
                    pipeline.invoke(&invocation.step, bindings);
                }
            }
        }

        Ok(pipeline)
    }

    /// Run configuration derived from the file
    pub fn run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            default_retries: self.max_retries.unwrap_or(defaults.default_retries),
            enable_cache: self.enable_cache,
        }
    }

    pub fn schedule(&self) -> Option<Schedule> {
        self.schedule.as_ref().map(|s| {
            let mut schedule = Schedule::new(
                s.name.clone().unwrap_or_else(|| self.name.clone()),
                &s.cron,
                &self.name,
            )
            .with_window(s.start_time, s.end_time);
            schedule.parameters = s.parameters.clone();
            schedule
        })
    }
}
