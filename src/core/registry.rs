//! Step registry

use crate::core::{error::RegistryError, step::StepDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Holds registered step definitions by name
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<StepDefinition>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step. Definitions are immutable once registered, so a second
    /// registration under the same name is rejected rather than replacing it.
    pub fn register(&mut self, step: StepDefinition) -> Result<Arc<StepDefinition>, RegistryError> {
        if self.steps.contains_key(&step.name) {
            return Err(RegistryError::Duplicate(step.name));
        }
        debug!("Registered step {} (fingerprint {})", step.name, step.fingerprint);
        let step = Arc::new(step);
        self.steps.insert(step.name.clone(), step.clone());
        Ok(step)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<StepDefinition>> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered step names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
