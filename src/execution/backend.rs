//! Execution backends - where node attempts actually run

use crate::core::{
    context::StepContext,
    error::{BackendError, StepError},
    settings::{ExecutionSettings, Settings},
    step::{StepDefinition, StepOutput},
};
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;
use uuid::Uuid;

/// Everything a backend needs to run one attempt of a node
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub run_id: Uuid,
    pub node_id: String,
    pub step: Arc<StepDefinition>,

    /// 1-based attempt number
    pub attempt: usize,

    /// Input values by input name
    pub inputs: BTreeMap<String, Value>,

    /// Merged step and pipeline settings
    pub settings: Settings,
}

impl NodeSpec {
    /// Image, resources and service account for this node
    pub fn execution(&self) -> ExecutionSettings {
        self.settings.execution()
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    fn context(&self, cancelled: Arc<AtomicBool>) -> StepContext {
        StepContext::new(self.run_id, self.node_id.clone(), self.step.name.clone(), self.attempt)
            .with_settings(self.settings.clone())
            .with_cancellation(cancelled)
    }
}

/// Opaque reference to a submitted attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub u64);

/// How an attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(StepOutput),
    Failed(StepError),
    Cancelled,
}

/// Runs node attempts somewhere
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Start an attempt. `BackendError::Unavailable` means the backend
    /// cannot take any work.
    async fn submit(&self, spec: NodeSpec) -> Result<BackendHandle, BackendError>;

    /// Wait for an attempt to finish
    async fn wait(&self, handle: BackendHandle) -> Result<Outcome, BackendError>;

    /// Request cancellation; the outcome is still reported through `wait`
    async fn cancel(&self, handle: BackendHandle) -> Result<(), BackendError>;
}

struct Job {
    task: Option<JoinHandle<Result<StepOutput, StepError>>>,
    abort: AbortHandle,
    cancelled: Arc<AtomicBool>,
}

/// Runs step bodies as tokio tasks in this process
pub struct LocalBackend {
    next_handle: AtomicU64,
    jobs: Mutex<HashMap<u64, Job>>,
    abort_on_cancel: bool,
    closed: AtomicBool,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
            abort_on_cancel: true,
            closed: AtomicBool::new(false),
        }
    }

    /// When false, cancellation only raises the step's cooperative flag
    pub fn with_abort_on_cancel(mut self, abort: bool) -> Self {
        self.abort_on_cancel = abort;
        self
    }

    /// Stop accepting work; later submits fail with `Unavailable`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Attempts submitted but not yet waited on
    pub async fn pending(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    async fn submit(&self, spec: NodeSpec) -> Result<BackendHandle, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("local backend is closed".to_string()));
        }

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = spec.context(cancelled.clone());

        debug!(
            "Submitting {} attempt {} as handle {}",
            spec.node_id, spec.attempt, handle
        );

        let body = spec.step.body.clone();
        let inputs = spec.inputs;
        let task = tokio::spawn(async move { body.invoke(&ctx, inputs).await });

        self.jobs.lock().await.insert(
            handle,
            Job {
                abort: task.abort_handle(),
                task: Some(task),
                cancelled,
            },
        );

        Ok(BackendHandle(handle))
    }

    async fn wait(&self, handle: BackendHandle) -> Result<Outcome, BackendError> {
        let task = {
            let mut jobs = self.jobs.lock().await;
            let job = jobs
                .get_mut(&handle.0)
                .ok_or(BackendError::UnknownHandle(handle.0))?;
            job.task.take().ok_or(BackendError::UnknownHandle(handle.0))?
        };

        let joined = task.await;
        self.jobs.lock().await.remove(&handle.0);

        match joined {
            Ok(Ok(output)) => Ok(Outcome::Succeeded(output)),
            Ok(Err(StepError::Cancelled)) => Ok(Outcome::Cancelled),
            Ok(Err(e)) => Ok(Outcome::Failed(e)),
            Err(e) if e.is_cancelled() => Ok(Outcome::Cancelled),
            Err(e) if e.is_panic() => Ok(Outcome::Failed(StepError::Panicked(panic_message(
                e.into_panic(),
            )))),
            Err(e) => Err(BackendError::Join(e.to_string())),
        }
    }

    async fn cancel(&self, handle: BackendHandle) -> Result<(), BackendError> {
        let jobs = self.jobs.lock().await;
        let job = jobs
            .get(&handle.0)
            .ok_or(BackendError::UnknownHandle(handle.0))?;
        job.cancelled.store(true, Ordering::SeqCst);
        if self.abort_on_cancel {
            job.abort.abort();
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
