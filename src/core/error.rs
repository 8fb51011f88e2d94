//! Error types shared across the engine

use thiserror::Error;

/// Errors raised while turning a pipeline into a DAG.
///
/// All of these are fatal and surface before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invocation '{invocation}' refers to unknown step '{step}'")]
    UnknownStep { invocation: String, step: String },

    #[error("parameter '{0}' is not declared by the pipeline")]
    UnknownParameter(String),

    #[error("duplicate invocation id '{0}'")]
    DuplicateInvocation(String),

    #[error("unresolved binding for input '{input}' of '{invocation}': {reason}")]
    UnresolvedBinding {
        invocation: String,
        input: String,
        reason: String,
    },

    #[error("type mismatch for input '{input}' of '{invocation}': expected {expected}, got {found}")]
    TypeMismatch {
        invocation: String,
        input: String,
        expected: String,
        found: String,
    },

    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("invalid settings for '{invocation}': {reason}")]
    InvalidSettings { invocation: String, reason: String },
}

/// Errors raised when defining or registering steps
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("step '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("step '{step}' declares '{name}' more than once")]
    DuplicateSpec { step: String, name: String },

    #[error("step '{step}' binds a model to undeclared output '{output}'")]
    UnknownModelOutput { step: String, output: String },
}

/// Errors from an artifact store or cache index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from cache resolution. These never fail a run; they degrade to a miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache index unavailable: {0}")]
    Index(StoreError),

    #[error("artifact store unavailable: {0}")]
    Store(StoreError),
}

/// Failure of a single step attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("step did not produce declared output '{0}'")]
    MissingOutput(String),

    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("step panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

/// Errors from the execution backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend cannot accept work at all. Fatal for the run.
    #[error("execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown backend handle {0}")]
    UnknownHandle(u64),

    #[error("backend task failed: {0}")]
    Join(String),
}

/// Errors raised when registering a schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule '{0}' has an empty cron expression")]
    Empty(String),

    #[error("malformed cron expression '{expression}': {reason}")]
    Malformed { expression: String, reason: String },

    #[error("schedule '{0}' is already registered")]
    DuplicateName(String),

    #[error("schedule '{0}' ends before it starts")]
    InvalidWindow(String),
}

/// Errors from optional sinks (experiment tracker, model registry)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink rejected '{key}': {reason}")]
    Rejected { key: String, reason: String },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Attempted an illegal node state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal node transition {from} -> {to}")]
pub struct StateError {
    pub from: String,
    pub to: String,
}

/// Errors surfaced by the orchestrator entry point
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("pipeline '{0}' is not registered")]
    UnknownPipeline(String),
}
