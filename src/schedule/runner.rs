//! Drives a schedule translator from the clock

use crate::core::error::OrchestratorError;
use crate::execution::{CancellationHandle, Orchestrator, RunReport};
use crate::schedule::translator::ScheduleTranslator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Ticks the translator periodically and submits due runs
pub struct ScheduleRunner {
    translator: Arc<Mutex<ScheduleTranslator>>,
    orchestrator: Arc<Orchestrator>,
    period: Duration,
}

impl ScheduleRunner {
    pub fn new(translator: Arc<Mutex<ScheduleTranslator>>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            translator,
            orchestrator,
            period: Duration::from_secs(10),
        }
    }

    /// How often to tick. Anything under a minute observes every minute.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Tick once at `now` and run every due request to completion
    pub async fn fire(&self, now: DateTime<Utc>) -> Vec<Result<RunReport, OrchestratorError>> {
        let requests = self.translator.lock().await.tick(now);
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.orchestrator.submit(request).await);
        }
        results
    }

    /// Tick until `shutdown` is cancelled. Runs are spawned so a slow run
    /// never delays the next tick; on shutdown they are cancelled and
    /// drained before this returns.
    pub async fn run(&self, shutdown: CancellationHandle) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut runs = JoinSet::new();

        info!("Schedule runner started (period {:?})", self.period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(finished) = runs.join_next(), if !runs.is_empty() => {
                    log_join(finished);
                    continue;
                }
                _ = interval.tick() => {}
            }

            let requests = self.translator.lock().await.tick(Utc::now());
            for request in requests {
                let orchestrator = self.orchestrator.clone();
                let cancel = shutdown.clone();
                runs.spawn(async move {
                    let pipeline = request.pipeline.clone();
                    match orchestrator.submit_with(request, &cancel).await {
                        Ok(report) => info!(
                            "Scheduled run {} of {} finished: {}",
                            report.run_id, pipeline, report.status
                        ),
                        Err(e) => error!("Scheduled run of {} failed to start: {}", pipeline, e),
                    }
                });
            }
        }

        if !runs.is_empty() {
            info!("Waiting for {} scheduled run(s) to stop", runs.len());
        }
        while let Some(finished) = runs.join_next().await {
            log_join(finished);
        }
        info!("Schedule runner stopped");
    }
}

fn log_join(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        error!("Scheduled run task failed: {}", e);
    }
}
