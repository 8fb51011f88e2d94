//! Content-addressed step cache

pub mod key;
pub mod resolver;

pub use key::{compute_cache_key, CacheKey, ResolvedInput};
pub use resolver::{CacheDecision, CacheResolver, MissReason};
