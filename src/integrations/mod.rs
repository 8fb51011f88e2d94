//! Optional sinks a run reports to

pub mod model_registry;
pub mod tracker;

pub use model_registry::{InMemoryModelRegistry, ModelRegistry, ModelVersion};
pub use tracker::{ExperimentTracker, InMemoryTracker, LogTracker, MetricRecord};
