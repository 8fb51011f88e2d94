//! Execution state models

use crate::core::error::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Run is dispatching nodes
    Running,
    /// Every node succeeded or was a cache hit
    Succeeded,
    /// At least one node failed, or the run was aborted
    Failed,
    /// Run was cancelled before completion
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single node within a run
///
/// ```text
/// pending -> ready -> cache-hit
///                  -> dispatched -> succeeded
///                                -> failed
/// ```
/// A pending node may also go straight to `failed` when an upstream fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Inputs not yet resolved
    Pending,
    /// All upstreams are terminal-success
    Ready,
    /// Outputs bound to previously stored artifacts
    CacheHit,
    /// Handed to the execution backend
    Dispatched { attempt: usize },
    Succeeded,
    Failed,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::CacheHit
        )
    }

    /// Terminal and usable by downstream nodes
    pub fn is_success(&self) -> bool {
        matches!(self, NodeState::Succeeded | NodeState::CacheHit)
    }

    /// Move to `next`, refusing to leave a terminal state or skip ahead
    pub fn transition(&mut self, next: NodeState) -> Result<(), StateError> {
        let allowed = match (*self, next) {
            (NodeState::Pending, NodeState::Ready) => true,
            (NodeState::Pending, NodeState::Failed) => true,
            (NodeState::Ready, NodeState::CacheHit) => true,
            (NodeState::Ready, NodeState::Dispatched { .. }) => true,
            (NodeState::Ready, NodeState::Failed) => true,
            (NodeState::Dispatched { attempt: a }, NodeState::Dispatched { attempt: b }) => b > a,
            (NodeState::Dispatched { .. }, NodeState::Succeeded) => true,
            (NodeState::Dispatched { .. }, NodeState::Failed) => true,
            _ => false,
        };

        if !allowed {
            return Err(StateError {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => f.write_str("pending"),
            NodeState::Ready => f.write_str("ready"),
            NodeState::CacheHit => f.write_str("cache-hit"),
            NodeState::Dispatched { attempt } => write!(f, "dispatched (attempt {})", attempt),
            NodeState::Succeeded => f.write_str("succeeded"),
            NodeState::Failed => f.write_str("failed"),
        }
    }
}
