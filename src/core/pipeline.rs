//! Pipeline domain model

use crate::core::{settings::Settings, step::ParamSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Where an invocation input gets its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// A literal value
    Literal(Value),
    /// A named output of an earlier invocation
    Output { invocation: String, output: String },
    /// A pipeline-level parameter
    Parameter(String),
}

impl Binding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Binding::Literal(value.into())
    }

    pub fn output(invocation: impl Into<String>, output: impl Into<String>) -> Self {
        Binding::Output {
            invocation: invocation.into(),
            output: output.into(),
        }
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Binding::Parameter(name.into())
    }
}

/// One use of a step inside a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique within the pipeline
    pub id: String,

    /// Registered step name
    pub step: String,

    /// Input name -> binding
    pub bindings: BTreeMap<String, Binding>,
}

/// A named, ordered composition of step invocations
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub name: String,

    /// Declared pipeline parameters, with optional defaults
    pub parameters: Vec<ParamSpec>,

    /// Invocations in declaration order
    pub invocations: Vec<Invocation>,

    /// Overrides step-level settings per key
    pub settings: Settings,

    /// When false, every node misses the cache for runs of this pipeline
    pub enable_cache: bool,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            invocations: Vec::new(),
            settings: Settings::new(),
            enable_cache: true,
        }
    }

    pub fn with_parameter(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cache(mut self, enable_cache: bool) -> Self {
        self.enable_cache = enable_cache;
        self
    }

    /// Append an invocation of `step` and return its id.
    ///
    /// The id is the step name; repeated invocations of the same step get
    /// `_2`, `_3`, ... suffixes.
    pub fn invoke<'a, I>(&mut self, step: &str, bindings: I) -> String
    where
        I: IntoIterator<Item = (&'a str, Binding)>,
    {
        let id = self.next_id(step);
        self.invoke_as(&id, step, bindings);
        id
    }

    /// Append an invocation with an explicit id
    pub fn invoke_as<'a, I>(&mut self, id: &str, step: &str, bindings: I)
    where
        I: IntoIterator<Item = (&'a str, Binding)>,
    {
        self.invocations.push(Invocation {
            id: id.to_string(),
            step: step.to_string(),
            bindings: bindings
                .into_iter()
                .map(|(name, binding)| (name.to_string(), binding))
                .collect(),
        });
    }

    pub fn invocation(&self, id: &str) -> Option<&Invocation> {
        self.invocations.iter().find(|i| i.id == id)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    fn next_id(&self, step: &str) -> String {
        if self.invocation(step).is_none() {
            return step.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", step, n);
            if self.invocation(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}
