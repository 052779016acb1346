//! Disposable STL render worker.
//!
//! This crate provides:
//! - Job executor: claim, render and record jobs until a batch limit,
//!   an idle timeout or a shutdown signal ends the run
//! - Outcome classification into completed, retry and failed
//! - Configuration, logging, metrics and shutdown plumbing for the binaries

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod outcome;
pub mod preflight;
pub mod shutdown;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{ExitReason, JobCounts, JobExecutor, RunSummary};
pub use logging::JobLogger;
pub use outcome::Outcome;
pub use shutdown::install_shutdown_handler;
