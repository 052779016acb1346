//! Job executor.
//!
//! One executor runs one loop with at most one job in flight. Scale-out is
//! more worker processes against the same store; the claim in
//! [`JobStore::reserve_next`] is the only coordination between them.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use stl_models::PrintJob;
use stl_render::Renderer;
use stl_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::outcome::Outcome;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    BatchLimit,
    IdleTimeout,
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchLimit => "batch_limit",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Jobs handled during a run, by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub processed: u32,
    pub completed: u32,
    pub retried: u32,
    pub failed: u32,
}

impl JobCounts {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Completed { .. } => self.completed += 1,
            Outcome::Retry { .. } => self.retried += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: ExitReason,
    pub counts: JobCounts,
}

/// Job executor that claims, renders and records jobs.
pub struct JobExecutor {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    renderer: Arc<dyn Renderer>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, store: Arc<dyn JobStore>, renderer: Arc<dyn Renderer>) -> Self {
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            store,
            renderer,
            consumer_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Run until the batch limit, the idle timeout or `shutdown`.
    ///
    /// Cancellation is checked before every claim and ends an idle wait
    /// early. It never interrupts a render: a job that was claimed is always
    /// rendered and its outcome persisted first.
    ///
    /// Store errors are not recovered and end the run with `Err`.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerResult<RunSummary> {
        info!(
            "Starting job executor '{}' for sku={} (batch_limit={}, idle_timeout={}s, max_retries={})",
            self.consumer_name,
            self.config.target_sku,
            self.config.batch_limit,
            self.config.idle_timeout.as_secs(),
            self.config.max_retries
        );

        let mut counts = JobCounts::default();
        let mut idle_since: Option<Instant> = None;

        let reason = loop {
            if shutdown.is_cancelled() {
                break ExitReason::Shutdown;
            }

            match self.store.reserve_next(&self.config.target_sku).await? {
                Some(job) => {
                    idle_since = None;
                    let outcome = self.process_job(&job).await?;
                    counts.record(&outcome);

                    if counts.processed >= self.config.batch_limit {
                        break ExitReason::BatchLimit;
                    }
                }
                None => {
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    let idle = since.elapsed();
                    if idle >= self.config.idle_timeout {
                        break ExitReason::IdleTimeout;
                    }

                    let wait = self.config.poll_interval.min(self.config.idle_timeout - idle);
                    debug!("No eligible job, waiting {}ms", wait.as_millis());
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        };

        metrics::record_exit(reason);
        info!(
            "Job executor '{}' stopped: {} (processed={}, completed={}, retried={}, failed={})",
            self.consumer_name,
            reason,
            counts.processed,
            counts.completed,
            counts.retried,
            counts.failed
        );

        Ok(RunSummary { reason, counts })
    }

    /// Render one claimed job and persist its outcome.
    async fn process_job(&self, job: &PrintJob) -> WorkerResult<Outcome> {
        let logger = JobLogger::new(job.id, "stl_render");
        logger.log_start(&format!("text={:?}", job.custom_text.as_deref().unwrap_or("")));
        metrics::record_job_claimed(&job.product_sku);

        let started = Instant::now();
        let attempt = self.renderer.render(job).instrument(logger.create_span()).await;
        metrics::record_render_duration(attempt.success, started.elapsed().as_secs_f64());

        let outcome = Outcome::decide(job, &attempt, self.config.max_retries);
        self.store.update(job.id, &outcome.to_patch()).await?;
        metrics::record_outcome(&job.product_sku, &outcome);

        match &outcome {
            Outcome::Completed { stl_path } => logger.log_completion(stl_path),
            Outcome::Retry { annotation, .. } => logger.log_warning(annotation),
            Outcome::Failed { annotation, .. } => logger.log_error(annotation),
        }

        Ok(outcome)
    }
}
