//! In-memory [`JobStore`] for tests and database-less runs.

use std::collections::HashMap;

use async_trait::async_trait;
use reelq_core::error::CoreError;
use reelq_core::job::{Job, JobStatus};
use reelq_core::store::{check_transition, clamp_page, JobStore, StatusFields};
use reelq_core::types::JobId;
use tokio::sync::RwLock;

/// A [`JobStore`] that keeps every job in a map guarded by an `RwLock`.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, regardless of status.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(CoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        fields: StatusFields,
    ) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or(CoreError::NotFound { entity: "tracked_job", id })?;
        check_transition(id, job.status, status)?;

        job.status = status;
        if let Some(attempts) = fields.attempts {
            job.attempts = attempts;
        }
        if fields.last_checked_at.is_some() {
            job.last_checked_at = fields.last_checked_at;
        }
        if fields.result.is_some() {
            job.result = fields.result;
        }
        job.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, CoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>, CoreError> {
        let mut matching: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        matching.sort_by_key(|job| job.created_at);
        Ok(matching)
    }

    async fn list_page(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Job>, CoreError> {
        let (limit, offset) = clamp_page(limit, offset);
        let mut all: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}
