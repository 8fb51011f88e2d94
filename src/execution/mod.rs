//! Pipeline execution: backends, the run scheduler and the orchestrator

pub mod backend;
pub mod cancel;
pub mod command;
pub mod engine;
pub mod events;
pub mod scheduler;

pub use backend::{BackendHandle, ExecutionBackend, LocalBackend, NodeSpec, Outcome};
pub use cancel::CancellationHandle;
pub use command::CommandStep;
pub use engine::{Orchestrator, OrchestratorBuilder};
pub use events::{EventBus, ExecutionEvent};
pub use scheduler::{NodeReport, RunConfig, RunReport, RunScheduler};
