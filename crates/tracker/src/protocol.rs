//! Messages exchanged between the orchestrator and the polling worker.
//!
//! The worker runs on its own thread and runtime; the two sides talk only
//! through these enums over unbounded channels. Both are serde-tagged so
//! they can be logged or carried over a process boundary unchanged.

use reelq_core::job::{Job, JobKind, JobStatus};
use reelq_core::types::JobId;
use serde::{Deserialize, Serialize};

/// Host -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Start tracking a job. Duplicate ids are ignored.
    Add(AddJob),
    /// Stop tracking a job. Unknown ids are ignored.
    Remove { id: JobId },
    /// Request a [`WorkerMessage::QueueStatus`] reply.
    GetQueue,
    /// Clear the suspension of every job of one owner.
    ResumeOwner { owner_id: String },
    /// Finish the current sweep and stop.
    Shutdown,
}

/// Everything the worker needs to poll one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddJob {
    pub id: JobId,
    pub kind: JobKind,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub owner_id: String,
    pub external_handle: String,
    #[serde(default = "pending")]
    pub status: JobStatus,
    /// Checks already spent, so a restored job keeps its budget.
    #[serde(default)]
    pub attempts: u32,
}

fn pending() -> JobStatus {
    JobStatus::Pending
}

impl From<&Job> for AddJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            correlation_id: job.correlation_id.clone(),
            owner_id: job.owner_id.clone(),
            external_handle: job.external_handle.clone(),
            status: job.status,
            attempts: job.attempts,
        }
    }
}

/// Worker -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Sent once, after warm-up, before any other message.
    Initialized,
    StatusUpdate { job_kind: JobKind, data: JobUpdate },
    QueueStatus { data: QueueSnapshot },
    /// A non-fatal problem (e.g. one failed status check).
    Error { error: String },
}

/// Progress or terminal notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub id: JobId,
    pub correlation_id: Option<String>,
    pub status: JobStatus,
    pub output_locator: Option<String>,
    pub error: Option<String>,
    pub progress: Option<u8>,
    /// The owner's session must be renewed before polling resumes.
    #[serde(default)]
    pub action_required: bool,
}

/// The worker's live set at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<QueuedJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub attempts: u32,
    pub suspended: bool,
}

impl QueueSnapshot {
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.iter().any(|j| j.id == id)
    }
}
