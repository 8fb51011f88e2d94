//! Graph construction

pub mod builder;
pub mod dag;

pub use builder::{build, GraphBuilder};
pub use dag::{Dag, Edge, InputRef, Node};
