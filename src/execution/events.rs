//! Run lifecycle events

use crate::core::state::RunStatus;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        nodes: usize,
    },
    NodeCacheHit {
        node_id: String,
    },
    NodeDispatched {
        node_id: String,
        attempt: usize,
    },
    NodeRetrying {
        node_id: String,
        attempt: usize,
        error: String,
    },
    NodeSucceeded {
        node_id: String,
        attempts: usize,
    },
    NodeFailed {
        node_id: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.lock().await.push(Arc::new(handler));
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        let handlers = self.handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}
