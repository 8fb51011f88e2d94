//! orchestra - a DAG orchestration engine for ML pipelines
//!
//! Steps declare typed inputs and outputs, pipelines wire step invocations
//! together, and the orchestrator builds each pipeline into a DAG, reuses
//! cached outputs where it can, and dispatches the rest to an execution
//! backend with bounded concurrency. Cron schedules go through the same
//! entry point as direct runs.

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod graph;
pub mod integrations;
pub mod persistence;
pub mod schedule;
pub mod store;

// Re-export commonly used types
pub use crate::core::{
    Binding, BuildError, FnStep, NodeState, ParamSpec, Pipeline, RunStatus, Settings, StepBody,
    StepContext, StepDefinition, StepError, StepOutput, StepRegistry,
};
pub use cache::{CacheKey, CacheResolver};
pub use execution::{
    CancellationHandle, ExecutionBackend, ExecutionEvent, LocalBackend, Orchestrator, RunConfig,
    RunReport, RunScheduler,
};
pub use graph::{build, Dag};
pub use schedule::{RunRequest, Schedule, ScheduleRunner, ScheduleTranslator};
pub use store::{ArtifactId, ArtifactStore, CacheIndex, InMemoryStore, TypedValue};
