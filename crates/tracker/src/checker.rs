//! One status check: ask the provider, map the answer, persist the result.

use std::sync::Arc;

use reelq_core::job::{JobResult, JobStatus};
use reelq_core::store::{JobStore, StatusFields};
use reelq_core::types::Timestamp;
use reelq_provider::error::ProviderError;
use reelq_provider::source::StatusSource;

use crate::registry::TrackedJob;

/// Error recorded when the provider reports failure without a reason.
const UNSPECIFIED_FAILURE: &str = "provider reported failure";

/// What a single check found.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// No observable change, or a change the state machine forbids.
    Unchanged,
    /// Moved to another non-terminal status (Pending -> Processing).
    Advanced(JobStatus),
    Completed { output_locator: Option<String> },
    Failed { reason: String },
    /// The check itself failed; the job stays tracked.
    CheckFailed(String),
    /// The owner's session must be renewed before this job can be checked.
    SessionExpired(String),
}

impl CheckOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Wraps the provider and the store for the polling worker.
#[derive(Clone)]
pub struct StatusChecker {
    source: Arc<dyn StatusSource>,
    store: Arc<dyn JobStore>,
}

impl StatusChecker {
    pub fn new(source: Arc<dyn StatusSource>, store: Arc<dyn JobStore>) -> Self {
        Self { source, store }
    }

    pub fn source(&self) -> &Arc<dyn StatusSource> {
        &self.source
    }

    /// Check one job and persist what the check found.
    ///
    /// `job.attempts` must already include this check. Every check writes
    /// `attempts` and `last_checked_at`, so a restored job resumes with the
    /// budget it has already spent; a transition also writes the new status
    /// and result. Persistence errors are logged and do not change the
    /// outcome: the job reaches the same status again on its next check or
    /// after reconciliation.
    pub async fn check(&self, job: &TrackedJob, checked_at: Timestamp) -> CheckOutcome {
        let status = match self.source.check(&job.external_handle, &job.owner_id).await {
            Ok(status) => status,
            Err(ProviderError::SessionExpired { message, .. }) => {
                self.persist(job, job.status, None, checked_at).await;
                return CheckOutcome::SessionExpired(message);
            }
            Err(e) => {
                self.persist(job, job.status, None, checked_at).await;
                return CheckOutcome::CheckFailed(e.to_string());
            }
        };

        let next = status.state.as_job_status();
        if next == job.status || !job.status.can_transition_to(next) {
            if next != job.status {
                tracing::debug!(
                    job_id = %job.id,
                    from = ?job.status,
                    to = ?next,
                    "Ignoring backwards status report",
                );
            }
            self.persist(job, job.status, None, checked_at).await;
            return CheckOutcome::Unchanged;
        }

        let (outcome, result) = match next {
            JobStatus::Pending | JobStatus::Processing => (CheckOutcome::Advanced(next), None),
            JobStatus::Completed => {
                let result = status
                    .output_locator
                    .clone()
                    .map(|locator| JobResult::Output { locator });
                (
                    CheckOutcome::Completed {
                        output_locator: status.output_locator,
                    },
                    result,
                )
            }
            JobStatus::Failed => {
                let reason = status
                    .error_message
                    .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string());
                let result = JobResult::Error {
                    message: reason.clone(),
                };
                (CheckOutcome::Failed { reason }, Some(result))
            }
        };

        self.persist(job, next, result, checked_at).await;
        outcome
    }

    /// Fail a job without asking the provider (attempt budget spent).
    pub async fn fail(&self, job: &TrackedJob, reason: &str, checked_at: Timestamp) {
        let result = JobResult::Error {
            message: reason.to_string(),
        };
        self.persist(job, JobStatus::Failed, Some(result), checked_at)
            .await;
    }

    async fn persist(
        &self,
        job: &TrackedJob,
        status: JobStatus,
        result: Option<JobResult>,
        checked_at: Timestamp,
    ) {
        let fields = StatusFields {
            attempts: Some(job.attempts),
            last_checked_at: Some(checked_at),
            result,
        };
        match self.store.update_status(job.id, status, fields).await {
            Ok(()) => {
                tracing::debug!(job_id = %job.id, status = ?status, "Job status persisted");
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    status = ?status,
                    error = %e,
                    "Failed to persist job status",
                );
            }
        }
    }
}
