//! Shared print job table.
//!
//! This crate provides:
//! - The [`JobStore`] contract: atomic claim of the oldest eligible job and
//!   partial updates of job records
//! - A PostgreSQL implementation for production
//! - An in-memory implementation for development and tests
//! - Maintenance queries for stuck and failed jobs

pub mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use stl_models::{JobId, JobPatch, PrintJob, RenderState, TaskStatus};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Access to the shared job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim the oldest job with `status = pending`,
    /// `render_state = pending` and `product_sku = target_sku`.
    ///
    /// The claimed job moves to `(in_progress, running)` and its
    /// pre-claim snapshot is returned. Returns `None` immediately when no
    /// job is eligible. Concurrent callers never receive the same job.
    async fn reserve_next(&self, target_sku: &str) -> StoreResult<Option<PrintJob>>;

    /// Apply a partial update to one job.
    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<()>;
}

/// Number of jobs in one `(status, render_state)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStateCount {
    pub status: TaskStatus,
    pub render_state: RenderState,
    pub count: u64,
}
