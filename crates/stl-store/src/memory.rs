//! In-memory job store.
//!
//! Claims are serialized by a single mutex, which gives the same mutual
//! exclusion the database gets from row locks. Used for local runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use stl_models::{JobId, JobPatch, PrintJob, RenderState, TaskStatus};

use crate::error::{StoreError, StoreResult};
use crate::{JobStateCount, JobStore};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<BTreeMap<JobId, PrintJob>>,
    next_id: AtomicI64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh job id.
    pub fn next_id(&self) -> JobId {
        JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Insert or replace a job.
    pub async fn insert(&self, job: PrintJob) -> JobId {
        let id = job.id;
        self.next_id.fetch_max(id.get(), Ordering::Relaxed);
        self.jobs.lock().await.insert(id, job);
        id
    }

    /// Create a pending job for `sku` with the given text.
    pub async fn push(&self, sku: &str, custom_text: &str) -> JobId {
        let job = PrintJob::new(self.next_id(), sku).with_custom_text(custom_text);
        self.insert(job).await
    }

    pub async fn get(&self, id: JobId) -> Option<PrintJob> {
        self.jobs.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Count jobs per `(status, render_state)`.
    pub async fn state_counts(&self, sku: Option<&str>) -> StoreResult<Vec<JobStateCount>> {
        let jobs = self.jobs.lock().await;
        let mut counts: BTreeMap<(&str, &str), JobStateCount> = BTreeMap::new();
        for job in jobs.values().filter(|j| sku_matches(j, sku)) {
            counts
                .entry((job.status.as_str(), job.render_state.as_str()))
                .or_insert(JobStateCount {
                    status: job.status,
                    render_state: job.render_state,
                    count: 0,
                })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }
}

fn sku_matches(job: &PrintJob, sku: Option<&str>) -> bool {
    sku.map_or(true, |s| job.product_sku == s)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn reserve_next(&self, target_sku: &str) -> StoreResult<Option<PrintJob>> {
        let mut jobs = self.jobs.lock().await;

        let Some(job) = jobs
            .values_mut()
            .filter(|j| j.is_claimable(target_sku))
            .min_by_key(|j| (j.created_at, j.id))
        else {
            return Ok(None);
        };

        let snapshot = job.clone();
        job.status = TaskStatus::InProgress;
        job.render_state = RenderState::Running;
        debug!(job_id = %snapshot.id, "Reserved job");

        Ok(Some(snapshot))
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        patch.apply_to(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_oldest_matching_sku() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let newer = PrintJob::new(JobId::new(1), "A").with_created_at(now);
        let older = PrintJob::new(JobId::new(2), "A").with_created_at(now - Duration::minutes(5));
        let other_sku = PrintJob::new(JobId::new(3), "B").with_created_at(now - Duration::hours(1));
        store.insert(newer).await;
        store.insert(older).await;
        store.insert(other_sku).await;

        let claimed = store.reserve_next("A").await.unwrap().unwrap();
        assert_eq!(claimed.id, JobId::new(2));
        // Snapshot is pre-transition.
        assert_eq!(claimed.status, TaskStatus::Pending);
        assert_eq!(claimed.render_state, RenderState::Pending);

        let stored = store.get(JobId::new(2)).await.unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(stored.render_state, RenderState::Running);

        assert_eq!(store.reserve_next("A").await.unwrap().unwrap().id, JobId::new(1));
        assert!(store.reserve_next("A").await.unwrap().is_none());
    }

    #[test]
    fn test_empty_store_returns_none() {
        let store = MemoryJobStore::new();
        let claimed = tokio_test::block_on(store.reserve_next("A")).unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_is_never_reclaimed() {
        let store = MemoryJobStore::new();
        let id = store.push("A", "x").await;
        store.reserve_next("A").await.unwrap().unwrap();
        store
            .update(
                id,
                &JobPatch::new()
                    .status(TaskStatus::Completed)
                    .render_state(RenderState::Failed)
                    .render_retries(3),
            )
            .await
            .unwrap();

        assert!(store.reserve_next("A").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_overlap() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..50 {
            store.push("A", &format!("job {i}")).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.reserve_next("A").await.unwrap() {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = MemoryJobStore::new();
        let err = store.update(JobId::new(99), &JobPatch::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_state_counts_by_sku() {
        let store = MemoryJobStore::new();
        store.push("A", "first").await;
        store.push("A", "second").await;
        let failed = store.push("A", "failed").await;
        store.push("B", "other").await;

        store.reserve_next("A").await.unwrap();
        store
            .update(
                failed,
                &JobPatch::new()
                    .status(TaskStatus::Completed)
                    .render_state(RenderState::Failed)
                    .render_retries(3),
            )
            .await
            .unwrap();

        let counts = store.state_counts(Some("A")).await.unwrap();
        assert_eq!(counts.len(), 3);
        assert!(counts.iter().all(|c| c.count == 1));
        assert_eq!(store.state_counts(None).await.unwrap().iter().map(|c| c.count).sum::<u64>(), 4);
    }
}
