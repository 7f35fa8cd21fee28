//! Postgres-backed [`JobStore`].

use async_trait::async_trait;
use reelq_core::error::CoreError;
use reelq_core::job::{Job, JobStatus};
use reelq_core::store::{check_transition, clamp_page, JobStore, StatusFields};
use reelq_core::types::JobId;

use crate::repositories::TrackedJobRepo;
use crate::DbPool;

/// [`JobStore`] over the `tracked_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Build the store once at startup: open the pool, verify it and
    /// apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = crate::create_pool(database_url).await.map_err(storage)?;
        crate::health_check(&pool).await.map_err(storage)?;
        crate::run_migrations(&pool)
            .await
            .map_err(|e| CoreError::Storage(format!("migrations failed: {e}")))?;
        tracing::info!("Job store connected and migrated");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn storage(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        TrackedJobRepo::insert(&self.pool, job).await.map_err(storage)
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        fields: StatusFields,
    ) -> Result<(), CoreError> {
        let updated = TrackedJobRepo::update_status(&self.pool, id, status, &fields)
            .await
            .map_err(storage)?;
        if updated {
            return Ok(());
        }

        // Nothing matched: report whether the row is missing or the move was illegal.
        match TrackedJobRepo::find_by_id(&self.pool, id).await.map_err(storage)? {
            None => Err(CoreError::NotFound { entity: "tracked_job", id }),
            Some(row) => {
                let from = JobStatus::from_id(row.status_id)?;
                check_transition(id, from, status)?;
                Err(CoreError::Conflict(format!(
                    "job {id} changed concurrently while moving to {status:?}"
                )))
            }
        }
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        TrackedJobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(storage)?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, CoreError> {
        TrackedJobRepo::list_by_status(&self.pool, statuses)
            .await
            .map_err(storage)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn list_page(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Job>, CoreError> {
        let (limit, offset) = clamp_page(limit, offset);
        TrackedJobRepo::list_page(&self.pool, limit, offset)
            .await
            .map_err(storage)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }
}
