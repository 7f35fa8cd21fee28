//! Row model for the `tracked_jobs` table.

use reelq_core::error::CoreError;
use reelq_core::job::{Job, JobKind, JobResult, JobStatus, StatusId};
use reelq_core::types::{JobId, Timestamp};
use sqlx::FromRow;

/// A row from the `tracked_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct TrackedJobRow {
    pub id: JobId,
    pub kind: String,
    pub external_handle: String,
    pub correlation_id: Option<String>,
    pub owner_id: String,
    pub status_id: StatusId,
    pub attempts: i32,
    pub last_checked_at: Option<Timestamp>,
    pub output_locator: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<TrackedJobRow> for Job {
    type Error = CoreError;

    fn try_from(row: TrackedJobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_id(row.status_id)?;
        let result = match (row.output_locator, row.error_message) {
            (Some(locator), _) => Some(JobResult::Output { locator }),
            (None, Some(message)) => Some(JobResult::Error { message }),
            (None, None) => None,
        };

        Ok(Job {
            id: row.id,
            kind: JobKind::parse(&row.kind)?,
            external_handle: row.external_handle,
            correlation_id: row.correlation_id,
            owner_id: row.owner_id,
            status,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_checked_at: row.last_checked_at,
            result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> TrackedJobRow {
        let now = chrono::Utc::now();
        TrackedJobRow {
            id: reelq_core::types::new_job_id(),
            kind: "upscale".into(),
            external_handle: "operations/42".into(),
            correlation_id: Some("item-1".into()),
            owner_id: "owner".into(),
            status_id: JobStatus::Completed.id(),
            attempts: 7,
            last_checked_at: Some(now),
            output_locator: Some("https://cdn.example/v.mp4".into()),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_maps_output_into_result() {
        let job = Job::try_from(row()).unwrap();
        assert_eq!(job.kind, JobKind::Upscale);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 7);
        assert_eq!(
            job.result.as_ref().and_then(JobResult::output_locator),
            Some("https://cdn.example/v.mp4")
        );
    }

    #[test]
    fn unknown_status_id_is_rejected() {
        let mut bad = row();
        bad.status_id = 11;
        assert!(Job::try_from(bad).is_err());
    }
}
