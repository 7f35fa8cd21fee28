//! The tracked job record and its status state machine.
//!
//! A [`Job`] is one asynchronous external operation (a video generation
//! or an upscale). It starts in [`JobStatus::Pending`] or
//! [`JobStatus::Processing`] and ends in exactly one terminal status.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{new_job_id, JobId, Timestamp};

/// Status ID type matching the SMALLINT `status_id` column.
pub type StatusId = i16;

/// Progress reported for non-terminal jobs never exceeds this value.
pub const MAX_ESTIMATED_PROGRESS: u8 = 95;

/// Progress reported once a job has actually completed.
pub const COMPLETED_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// What the external provider is producing for this job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Video creation from a prompt or source image.
    Generation,
    /// Resolution upscale of an existing video.
    Upscale,
}

impl JobKind {
    /// Stable lowercase name, used for storage and logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Upscale => "upscale",
        }
    }

    /// Parse the stored name back into a kind.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "generation" => Ok(Self::Generation),
            "upscale" => Ok(Self::Upscale),
            other => Err(CoreError::Validation(format!("unknown job kind '{other}'"))),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Tracking status. Discriminants match the stored `status_id` values.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    /// Statuses that are still eligible for polling.
    pub const NON_TERMINAL: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a stored status ID back to a status.
    pub fn from_id(id: StatusId) -> Result<Self, CoreError> {
        match id {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Processing),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!("unknown job status id {other}"))),
        }
    }

    /// Completed and Failed are terminal; a terminal job is never polled again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same non-terminal status is allowed (a check that
    /// observed no change); leaving a terminal status never is.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match self {
            Self::Pending => true,
            Self::Processing => next != Self::Pending,
            Self::Completed | Self::Failed => false,
        }
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

// ---------------------------------------------------------------------------
// JobResult
// ---------------------------------------------------------------------------

/// Outcome attached to a job once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResult {
    /// Where the finished video can be fetched from.
    Output { locator: String },
    /// Why the job failed.
    Error { message: String },
}

impl JobResult {
    pub fn output_locator(&self) -> Option<&str> {
        match self {
            Self::Output { locator } => Some(locator),
            Self::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            Self::Output { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The canonical record of a tracked job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Provider-side operation name used for status checks.
    pub external_handle: String,
    /// Caller-supplied routing id (e.g. a batch item id). Never affects polling.
    pub correlation_id: Option<String>,
    /// Account/session context the status check runs under.
    pub owner_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_checked_at: Option<Timestamp>,
    pub result: Option<JobResult>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Build a freshly submitted job in [`JobStatus::Pending`].
    pub fn new(
        kind: JobKind,
        external_handle: impl Into<String>,
        owner_id: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_job_id(),
            kind,
            external_handle: external_handle.into(),
            correlation_id,
            owner_id: owner_id.into(),
            status: JobStatus::Pending,
            attempts: 0,
            last_checked_at: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the starting status (Pending or Processing).
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Cosmetic completion estimate derived from how many checks were spent.
///
/// Monotonic in `attempts` and capped at [`MAX_ESTIMATED_PROGRESS`] until
/// the provider actually reports completion.
pub fn estimate_progress(attempts: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return 0;
    }
    let percent = (u64::from(attempts) * 100) / u64::from(max_attempts);
    percent.min(u64::from(MAX_ESTIMATED_PROGRESS)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ids_match_stored_values() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Processing.id(), 2);
        assert_eq!(JobStatus::Completed.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert!(JobStatus::from_id(9).is_err());
    }

    #[test]
    fn terminal_statuses_never_transition() {
        for next in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert!(!JobStatus::Completed.can_transition_to(next));
            assert!(!JobStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn processing_cannot_fall_back_to_pending() {
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut last = 0;
        for attempts in 0..=400 {
            let p = estimate_progress(attempts, 360);
            assert!(p >= last);
            assert!(p <= MAX_ESTIMATED_PROGRESS);
            last = p;
        }
        assert_eq!(estimate_progress(360, 360), MAX_ESTIMATED_PROGRESS);
        assert_eq!(estimate_progress(36, 360), 10);
        assert_eq!(estimate_progress(5, 0), 0);
    }

    #[test]
    fn kind_names_parse_back() {
        assert_eq!(JobKind::parse("upscale").unwrap(), JobKind::Upscale);
        assert_eq!(JobKind::Generation.to_string(), "generation");
        assert!(JobKind::parse("audio").is_err());
    }

    #[test]
    fn new_job_starts_pending_with_no_attempts() {
        let job = Job::new(JobKind::Generation, "operations/abc", "owner-1", None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_checked_at.is_none());
        assert!(!job.is_terminal());
    }
}
