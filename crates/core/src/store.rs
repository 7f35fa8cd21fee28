//! Persisted job registry collaborator.
//!
//! The tracker never talks to a database directly; it depends on a
//! [`JobStore`] injected at construction time. `reelq-db` provides a
//! Postgres implementation and an in-memory one.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::job::{Job, JobResult, JobStatus};
use crate::types::{JobId, Timestamp};

/// Maximum page size for [`JobStore::list_page`].
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Default page size for [`JobStore::list_page`].
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Extra columns written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    pub attempts: Option<u32>,
    pub last_checked_at: Option<Timestamp>,
    pub result: Option<JobResult>,
}

/// Create/read/update access to persisted jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    async fn create(&self, job: &Job) -> Result<(), CoreError>;

    /// Move a job to `status` and write the accompanying fields.
    ///
    /// Writing the same terminal status twice is accepted so that a late
    /// duplicate check stays harmless; any other move out of a terminal
    /// status is rejected with [`CoreError::InvalidTransition`].
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        fields: StatusFields,
    ) -> Result<(), CoreError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, CoreError>;

    /// All jobs whose status is one of `statuses`, oldest first.
    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, CoreError>;

    /// A page of jobs, newest first.
    async fn list_page(&self, limit: Option<i64>, offset: Option<i64>)
        -> Result<Vec<Job>, CoreError>;
}

/// Clamp caller-supplied pagination to sane bounds.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Validate a status write against the state machine.
///
/// Idempotent terminal rewrites are allowed; see [`JobStore::update_status`].
pub fn check_transition(id: JobId, from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
    if from == to && from.is_terminal() {
        return Ok(());
    }
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { id, from, to })
    }
}
