//! Step context - what a step body can see about the attempt it runs in

use crate::core::settings::Settings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Execution context for one step attempt
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Run this attempt belongs to
    pub run_id: Uuid,

    /// Node (invocation) id within the run
    pub node_id: String,

    /// Step name
    pub step: String,

    /// 1-based attempt number
    pub attempt: usize,

    /// Merged settings for the node
    pub settings: Settings,

    cancelled: Arc<AtomicBool>,
}

impl StepContext {
    pub fn new(run_id: Uuid, node_id: impl Into<String>, step: impl Into<String>, attempt: usize) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            step: step.into(),
            attempt,
            settings: Settings::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a cancellation flag with the backend that owns this attempt
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Long-running bodies should poll this and stop early when set
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
