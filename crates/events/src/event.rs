//! Event payloads published on the [`EventBus`](crate::bus::EventBus).

use chrono::{DateTime, Utc};
use reelq_core::job::{JobKind, JobStatus};
use reelq_core::job_events::{status_channel, CHANNEL_BATCH};
use reelq_core::types::{BatchId, JobId};
use serde::{Deserialize, Serialize};

/// A job's status as observed by the polling worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub id: JobId,
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Estimated completion percentage (0-100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Set when a human must intervene (e.g. the owner's session expired).
    #[serde(default)]
    pub action_required: bool,
}

/// Outcome of one item in a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemEvent {
    pub batch_id: BatchId,
    /// Position of the item in the submitted request list.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub action_required: bool,
}

/// Everything the tracker broadcasts to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A job's status or progress changed.
    JobStatusChanged(JobStatusEvent),

    /// A batch was accepted and dispatch is starting.
    BatchStarted { batch_id: BatchId, total: usize },

    /// One batch item was dispatched (successfully or not).
    BatchItemProgress(BatchItemEvent),

    /// Every item of a batch has been dispatched.
    BatchCompleted {
        batch_id: BatchId,
        success_count: usize,
        failure_count: usize,
        total: usize,
    },
}

impl TrackerEvent {
    /// The broadcast channel this event belongs to.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::JobStatusChanged(e) => status_channel(e.kind),
            Self::BatchStarted { .. }
            | Self::BatchItemProgress(_)
            | Self::BatchCompleted { .. } => CHANNEL_BATCH,
        }
    }
}

/// A published event stamped with its channel and publication time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub channel: &'static str,
    pub event: TrackerEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: TrackerEvent) -> Self {
        Self {
            channel: event.channel(),
            event,
            timestamp: Utc::now(),
        }
    }
}
