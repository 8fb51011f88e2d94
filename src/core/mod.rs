//! Core domain models
//!
//! Steps, pipelines, settings bundles and the node/run state machines that
//! the graph builder and scheduler operate on.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod settings;
pub mod state;
pub mod step;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use registry::*;
pub use settings::Settings;
pub use state::*;
pub use step::*;
