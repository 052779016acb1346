//! PostgreSQL-backed job store.

use std::convert::TryFrom;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use tracing::{debug, info};

use stl_models::{JobId, JobPatch, PrintJob, RenderState, TaskStatus};

use crate::error::{StoreError, StoreResult};
use crate::{JobStateCount, JobStore};

const JOB_COLUMNS: &str = "id, status, stl_render_state, product_sku, custom_text, color_1, \
     color_2, render_retries, stl_path, annotation, created_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    status: String,
    stl_render_state: String,
    product_sku: String,
    custom_text: Option<String>,
    color_1: Option<String>,
    color_2: Option<String>,
    render_retries: i32,
    stl_path: Option<String>,
    annotation: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for PrintJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(|e| StoreError::corrupt(format!("job {}: {e}", row.id)))?;
        let render_state = row
            .stl_render_state
            .parse::<RenderState>()
            .map_err(|e| StoreError::corrupt(format!("job {}: {e}", row.id)))?;
        let render_retries = u32::try_from(row.render_retries).map_err(|_| {
            StoreError::corrupt(format!("job {}: negative render_retries", row.id))
        })?;

        Ok(Self {
            id: JobId::new(row.id),
            status,
            render_state,
            product_sku: row.product_sku,
            custom_text: row.custom_text,
            color_1: row.color_1,
            color_2: row.color_2,
            render_retries,
            stl_path: row.stl_path,
            annotation: row.annotation,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CountRow {
    status: String,
    stl_render_state: String,
    count: i64,
}

/// Job store over the `print_tasks` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Arc<PgPool>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        info!("Connected to job database (max_connections={})", max_connections);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(self.pool()).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn find(&self, id: JobId) -> StoreResult<Option<PrintJob>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM print_tasks WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(self.pool())
        .await?;

        row.map(PrintJob::try_from).transpose()
    }

    /// Insert a new pending job, returning its id.
    pub async fn insert(&self, job: &PrintJob) -> StoreResult<JobId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO print_tasks
                (status, stl_render_state, product_sku, custom_text, color_1, color_2,
                 render_retries, stl_path, annotation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.render_state.as_str())
        .bind(&job.product_sku)
        .bind(&job.custom_text)
        .bind(&job.color_1)
        .bind(&job.color_2)
        .bind(retries_to_db(job.render_retries))
        .bind(&job.stl_path)
        .bind(&job.annotation)
        .bind(job.created_at)
        .fetch_one(self.pool())
        .await?;

        Ok(JobId::new(id))
    }

    /// Move `(in_progress, running)` jobs back to `(pending, pending)`.
    pub async fn reset_stuck(&self, sku: Option<&str>) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new(
            "UPDATE print_tasks SET status = 'pending', stl_render_state = 'pending' \
             WHERE status = 'in_progress' AND stl_render_state = 'running'",
        );
        push_sku_filter(&mut qb, sku);

        let result = qb.build().execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Move permanently failed jobs back into the eligible pool.
    pub async fn reset_failed(&self, sku: Option<&str>) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new(
            "UPDATE print_tasks SET status = 'pending', stl_render_state = 'pending', \
             render_retries = 0, stl_path = NULL \
             WHERE stl_render_state = 'failed'",
        );
        push_sku_filter(&mut qb, sku);

        let result = qb.build().execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Count jobs per `(status, render_state)`.
    pub async fn state_counts(&self, sku: Option<&str>) -> StoreResult<Vec<JobStateCount>> {
        let mut qb = QueryBuilder::new(
            "SELECT status, stl_render_state, COUNT(*) AS count FROM print_tasks WHERE 1=1",
        );
        push_sku_filter(&mut qb, sku);
        qb.push(" GROUP BY status, stl_render_state ORDER BY status, stl_render_state");

        let rows = qb.build_query_as::<CountRow>().fetch_all(self.pool()).await?;
        rows.into_iter()
            .map(|row| -> StoreResult<JobStateCount> {
                Ok(JobStateCount {
                    status: row.status.parse().map_err(|e| StoreError::corrupt(format!("{e}")))?,
                    render_state: row
                        .stl_render_state
                        .parse()
                        .map_err(|e| StoreError::corrupt(format!("{e}")))?,
                    count: u64::try_from(row.count).unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Jobs currently held in `(in_progress, running)`.
    pub async fn running_jobs(&self, sku: Option<&str>) -> StoreResult<Vec<PrintJob>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {JOB_COLUMNS} FROM print_tasks \
             WHERE status = 'in_progress' AND stl_render_state = 'running'"
        ));
        push_sku_filter(&mut qb, sku);
        qb.push(" ORDER BY created_at, id");

        let rows = qb.build_query_as::<JobRow>().fetch_all(self.pool()).await?;
        rows.into_iter().map(PrintJob::try_from).collect()
    }
}

fn push_sku_filter(qb: &mut QueryBuilder<'_, sqlx::Postgres>, sku: Option<&str>) {
    if let Some(sku) = sku {
        qb.push(" AND product_sku = ");
        qb.push_bind(sku.to_string());
    }
}

fn retries_to_db(retries: u32) -> i32 {
    i32::try_from(retries).unwrap_or(i32::MAX)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn reserve_next(&self, target_sku: &str) -> StoreResult<Option<PrintJob>> {
        let mut tx = self.pool.begin().await?;

        // Row lock held until commit; SKIP LOCKED lets concurrent claimers
        // move on to the next eligible row instead of waiting.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM print_tasks \
             WHERE status = 'pending' AND stl_render_state = 'pending' AND product_sku = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(target_sku)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE print_tasks SET status = 'in_progress', stl_render_state = 'running' \
             WHERE id = $1",
        )
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job_id = row.id, "Reserved job");

        PrintJob::try_from(row).map(Some)
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE print_tasks
               SET status = COALESCE($2, status),
                   stl_render_state = COALESCE($3, stl_render_state),
                   render_retries = COALESCE($4, render_retries),
                   stl_path = CASE WHEN $5 THEN $6 ELSE stl_path END,
                   annotation = CASE WHEN $7 THEN $8 ELSE annotation END
             WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.render_state.map(|s| s.as_str()))
        .bind(patch.render_retries.map(retries_to_db))
        .bind(patch.stl_path.is_some())
        .bind(patch.stl_path.clone().flatten())
        .bind(patch.annotation.is_some())
        .bind(patch.annotation.clone().flatten())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A SKU no other test run uses, so tests can share one database.
    fn unique_sku() -> String {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        format!(
            "TEST-SKU-{}-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    async fn store() -> PgJobStore {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgJobStore::connect(&url, 8).await.expect("connect");
        store.run_migrations().await.expect("migrate");
        store
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_reserve_and_update_round() {
        let store = store().await;
        let sku = unique_sku();
        let id = store
            .insert(&PrintJob::new(JobId::new(0), &sku).with_custom_text("Hello/World"))
            .await
            .unwrap();

        let claimed = store.reserve_next(&sku).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.render_state, RenderState::Pending);

        let stored = store.find(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(stored.render_state, RenderState::Running);

        store
            .update(
                id,
                &JobPatch::new()
                    .status(TaskStatus::Completed)
                    .render_state(RenderState::Completed)
                    .stl_path(Some("public/stl/x.stl".into()))
                    .annotation(None),
            )
            .await
            .unwrap();

        let stored = store.find(id).await.unwrap().unwrap();
        assert_eq!(stored.stl_path.as_deref(), Some("public/stl/x.stl"));
        assert!(store.reserve_next(&sku).await.unwrap().is_none());
    }

    fn job_in(sku: &str, status: TaskStatus, render_state: RenderState) -> PrintJob {
        let mut job = PrintJob::new(JobId::new(0), sku);
        job.status = status;
        job.render_state = render_state;
        job
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_reset_stuck_only_touches_running_jobs_of_sku() {
        let store = store().await;
        let sku = unique_sku();
        let other_sku = unique_sku();
        let stuck = store
            .insert(&job_in(&sku, TaskStatus::InProgress, RenderState::Running))
            .await
            .unwrap();
        let pending = store
            .insert(&job_in(&sku, TaskStatus::Pending, RenderState::Pending))
            .await
            .unwrap();
        let other = store
            .insert(&job_in(&other_sku, TaskStatus::InProgress, RenderState::Running))
            .await
            .unwrap();

        assert_eq!(store.reset_stuck(Some(&sku)).await.unwrap(), 1);

        let job = store.find(stuck).await.unwrap().unwrap();
        assert_eq!(job.status, TaskStatus::Pending);
        assert_eq!(job.render_state, RenderState::Pending);
        assert!(store.find(pending).await.unwrap().unwrap().is_claimable(&sku));
        let job = store.find(other).await.unwrap().unwrap();
        assert_eq!(job.render_state, RenderState::Running);

        assert_eq!(store.reset_stuck(Some(&other_sku)).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_reset_failed_restores_retry_budget() {
        let store = store().await;
        let sku = unique_sku();
        let mut failed = job_in(&sku, TaskStatus::Completed, RenderState::Failed);
        failed.render_retries = 3;
        failed.annotation = Some("STL render error (3/3): OpenSCAD exit 1".into());
        let failed = store.insert(&failed).await.unwrap();
        let mut done = job_in(&sku, TaskStatus::Completed, RenderState::Completed);
        done.stl_path = Some("public/stl/task_1_done.stl".into());
        let done = store.insert(&done).await.unwrap();

        assert_eq!(store.reset_failed(Some(&sku)).await.unwrap(), 1);

        let job = store.find(failed).await.unwrap().unwrap();
        assert_eq!(job.status, TaskStatus::Pending);
        assert_eq!(job.render_state, RenderState::Pending);
        assert_eq!(job.render_retries, 0);
        assert!(job.stl_path.is_none());
        assert!(job.annotation.is_some());

        let job = store.find(done).await.unwrap().unwrap();
        assert_eq!(job.render_state, RenderState::Completed);
        assert_eq!(job.stl_path.as_deref(), Some("public/stl/task_1_done.stl"));

        assert_eq!(store.reserve_next(&sku).await.unwrap().unwrap().id, failed);
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_state_counts_group_by_state() {
        let store = store().await;
        let sku = unique_sku();
        for _ in 0..3 {
            store
                .insert(&job_in(&sku, TaskStatus::Pending, RenderState::Pending))
                .await
                .unwrap();
        }
        store
            .insert(&job_in(&sku, TaskStatus::Completed, RenderState::Failed))
            .await
            .unwrap();
        store
            .insert(&job_in(&unique_sku(), TaskStatus::Pending, RenderState::Pending))
            .await
            .unwrap();
        store.reserve_next(&sku).await.unwrap().unwrap();

        let counts = store.state_counts(Some(&sku)).await.unwrap();
        let count_of = |status: TaskStatus, render_state: RenderState| {
            counts
                .iter()
                .find(|c| c.status == status && c.render_state == render_state)
                .map_or(0, |c| c.count)
        };

        assert_eq!(counts.len(), 3);
        assert_eq!(count_of(TaskStatus::Pending, RenderState::Pending), 2);
        assert_eq!(count_of(TaskStatus::InProgress, RenderState::Running), 1);
        assert_eq!(count_of(TaskStatus::Completed, RenderState::Failed), 1);
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_running_jobs_oldest_first() {
        let store = store().await;
        let sku = unique_sku();
        let now = Utc::now();
        let mut ids = Vec::new();
        for minutes in [30, 20, 10] {
            let job = PrintJob::new(JobId::new(0), &sku)
                .with_created_at(now - chrono::Duration::minutes(minutes));
            ids.push(store.insert(&job).await.unwrap());
        }
        store.reserve_next(&sku).await.unwrap().unwrap();
        store.reserve_next(&sku).await.unwrap().unwrap();

        let running = store.running_jobs(Some(&sku)).await.unwrap();

        assert_eq!(running.iter().map(|j| j.id).collect::<Vec<_>>(), ids[..2]);
        assert!(running.iter().all(|j| j.render_state == RenderState::Running));

        store.reset_stuck(Some(&sku)).await.unwrap();
        assert!(store.running_jobs(Some(&sku)).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires Postgres"]
    async fn test_concurrent_claims_never_overlap() {
        let store = store().await;
        let sku = unique_sku();
        for i in 0..20 {
            store
                .insert(&PrintJob::new(JobId::new(0), &sku).with_custom_text(format!("{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let store = store.clone();
            let sku = sku.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(job) = store.reserve_next(&sku).await.unwrap() {
                    ids.push(job.id);
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }
}
