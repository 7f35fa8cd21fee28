//! Repository for the `tracked_jobs` table.
//!
//! Uses `JobStatus` ids for every status literal; the state machine is
//! enforced in the `WHERE` clause of [`TrackedJobRepo::update_status`].

use reelq_core::job::{Job, JobStatus, StatusId};
use reelq_core::store::StatusFields;
use reelq_core::types::JobId;
use sqlx::PgPool;

use crate::models::tracked_job::TrackedJobRow;

/// Column list for `tracked_jobs` queries.
const COLUMNS: &str = "\
    id, kind, external_handle, correlation_id, owner_id, status_id, \
    attempts, last_checked_at, output_locator, error_message, \
    created_at, updated_at";

/// Provides CRUD operations for tracked jobs.
pub struct TrackedJobRepo;

impl TrackedJobRepo {
    /// Insert a job record exactly as given.
    pub async fn insert(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tracked_jobs \
                 (id, kind, external_handle, correlation_id, owner_id, status_id, \
                  attempts, last_checked_at, output_locator, error_message, \
                  created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.external_handle)
        .bind(&job.correlation_id)
        .bind(&job.owner_id)
        .bind(job.status.id())
        .bind(job.attempts as i32)
        .bind(job.last_checked_at)
        .bind(job.result.as_ref().and_then(|r| r.output_locator()))
        .bind(job.result.as_ref().and_then(|r| r.error_message()))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Apply a status transition.
    ///
    /// Returns `false` when no row matched: either the job does not exist
    /// or the transition is not allowed from its current status.
    pub async fn update_status(
        pool: &PgPool,
        id: JobId,
        status: JobStatus,
        fields: &StatusFields,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tracked_jobs \
             SET status_id = $2, \
                 attempts = COALESCE($3, attempts), \
                 last_checked_at = COALESCE($4, last_checked_at), \
                 output_locator = COALESCE($5, output_locator), \
                 error_message = COALESCE($6, error_message), \
                 updated_at = NOW() \
             WHERE id = $1 \
               AND (status_id NOT IN ($7, $8) OR status_id = $2) \
               AND NOT (status_id = $9 AND $2 = $10)",
        )
        .bind(id)
        .bind(status.id())
        .bind(fields.attempts.map(|a| a as i32))
        .bind(fields.last_checked_at)
        .bind(fields.result.as_ref().and_then(|r| r.output_locator()))
        .bind(fields.result.as_ref().and_then(|r| r.error_message()))
        .bind(JobStatus::Completed.id())
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Processing.id())
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job row by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<TrackedJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tracked_jobs WHERE id = $1");
        sqlx::query_as::<_, TrackedJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All rows whose status is in `statuses`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        statuses: &[JobStatus],
    ) -> Result<Vec<TrackedJobRow>, sqlx::Error> {
        let ids: Vec<StatusId> = statuses.iter().map(|s| s.id()).collect();
        let query = format!(
            "SELECT {COLUMNS} FROM tracked_jobs \
             WHERE status_id = ANY($1) \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, TrackedJobRow>(&query)
            .bind(&ids)
            .fetch_all(pool)
            .await
    }

    /// A page of rows, newest first. Bounds are clamped by the caller.
    pub async fn list_page(
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TrackedJobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tracked_jobs \
             ORDER BY created_at DESC \
             LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, TrackedJobRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
