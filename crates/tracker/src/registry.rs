//! The polling worker's live set of in-flight jobs.

use std::collections::BTreeMap;
use std::time::Duration;

use reelq_core::job::{JobKind, JobStatus};
use reelq_core::types::JobId;
use tokio::time::Instant;

use crate::protocol::{AddJob, QueueSnapshot, QueuedJob};

/// One job as the worker sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub external_handle: String,
    pub correlation_id: Option<String>,
    pub owner_id: String,
    pub status: JobStatus,
    /// Every check made, including ones refused for an expired session.
    pub attempts: u32,
    /// Checks refused because the owner's session expired. They are part of
    /// `attempts` but do not spend the budget.
    pub suspended_checks: u32,
    /// Tick at which the job was last checked; `None` until the first check.
    pub last_checked: Option<Instant>,
    /// Set when the owner's session expired; suspended jobs are skipped.
    pub suspended: bool,
}

impl From<AddJob> for TrackedJob {
    fn from(add: AddJob) -> Self {
        Self {
            id: add.id,
            kind: add.kind,
            external_handle: add.external_handle,
            correlation_id: add.correlation_id,
            owner_id: add.owner_id,
            status: add.status,
            attempts: add.attempts,
            suspended_checks: 0,
            last_checked: None,
            suspended: false,
        }
    }
}

impl TrackedJob {
    /// Checks that count against the attempt budget.
    pub fn budget_spent(&self) -> u32 {
        self.attempts.saturating_sub(self.suspended_checks)
    }

    /// Whether the job is due for a check at `now`.
    fn is_due(&self, now: Instant, interval: Duration) -> bool {
        if self.suspended {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }
}

/// In-flight jobs keyed by id.
///
/// Ids are time-ordered v7 UUIDs, so iteration order follows creation
/// order and a sweep visits older jobs first.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<JobId, TrackedJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a job. Returns `false` if the id is already tracked
    /// or the job is terminal.
    pub fn add(&mut self, job: TrackedJob) -> bool {
        if job.status.is_terminal() || self.jobs.contains_key(&job.id) {
            return false;
        }
        self.jobs.insert(job.id, job);
        true
    }

    /// Stop tracking a job. Unknown ids are a no-op.
    pub fn remove(&mut self, id: JobId) -> Option<TrackedJob> {
        self.jobs.remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<&TrackedJob> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut TrackedJob> {
        self.jobs.get_mut(&id)
    }

    /// Every tracked job. Terminal jobs leave the registry as soon as they
    /// are observed, so these are all non-terminal.
    pub fn list_non_terminal(&self) -> impl Iterator<Item = &TrackedJob> {
        self.jobs.values()
    }

    /// Ids of the jobs due for a check at `now`.
    pub fn eligible(&self, now: Instant, interval: Duration) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|job| job.is_due(now, interval))
            .map(|job| job.id)
            .collect()
    }

    /// Clear the suspension of every job owned by `owner_id`.
    ///
    /// Returns how many jobs were resumed.
    pub fn resume_owner(&mut self, owner_id: &str) -> usize {
        let mut resumed = 0;
        for job in self.jobs.values_mut() {
            if job.suspended && job.owner_id == owner_id {
                job.suspended = false;
                resumed += 1;
            }
        }
        resumed
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self
                .jobs
                .values()
                .map(|job| QueuedJob {
                    id: job.id,
                    kind: job.kind,
                    status: job.status,
                    attempts: job.attempts,
                    suspended: job.suspended,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
