//! Prometheus metrics for the worker.
//!
//! Recording is always safe: without an installed recorder the macros are
//! no-ops, so the exporter is only started when an address is configured.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};
use crate::executor::ExitReason;
use crate::outcome::Outcome;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "stl_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "stl_jobs_completed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "stl_jobs_retried_total";
    pub const JOBS_FAILED_TOTAL: &str = "stl_jobs_failed_total";
    pub const RENDER_DURATION_SECONDS: &str = "stl_render_duration_seconds";
    pub const WORKER_EXITS_TOTAL: &str = "stl_worker_exits_total";
}

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter on {addr}: {e}")))
}

pub fn record_job_claimed(sku: &str) {
    let labels = [("sku", sku.to_string())];
    counter!(names::JOBS_CLAIMED_TOTAL, &labels).increment(1);
}

/// Record the outcome of one render attempt.
pub fn record_outcome(sku: &str, outcome: &Outcome) {
    let labels = [("sku", sku.to_string())];
    let name = match outcome {
        Outcome::Completed { .. } => names::JOBS_COMPLETED_TOTAL,
        Outcome::Retry { .. } => names::JOBS_RETRIED_TOTAL,
        Outcome::Failed { .. } => names::JOBS_FAILED_TOTAL,
    };
    counter!(name, &labels).increment(1);
}

pub fn record_render_duration(success: bool, duration_secs: f64) {
    let labels = [("success", success.to_string())];
    histogram!(names::RENDER_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_exit(reason: ExitReason) {
    let labels = [("reason", reason.as_str().to_string())];
    counter!(names::WORKER_EXITS_TOTAL, &labels).increment(1);
}
