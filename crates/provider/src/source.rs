//! Collaborator seams for status checks and job submission.

use async_trait::async_trait;
use reelq_core::job::{JobKind, JobStatus};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Provider-side lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ProviderState {
    /// The tracking status this provider state corresponds to.
    pub fn as_job_status(self) -> JobStatus {
        match self {
            Self::Queued => JobStatus::Pending,
            Self::Running => JobStatus::Processing,
            Self::Succeeded => JobStatus::Completed,
            Self::Failed => JobStatus::Failed,
        }
    }
}

/// Result of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub state: ProviderState,
    /// Where the output can be fetched from, once succeeded.
    pub output_locator: Option<String>,
    /// Provider-supplied failure description.
    pub error_message: Option<String>,
}

impl ProviderStatus {
    pub fn queued() -> Self {
        Self::with_state(ProviderState::Queued)
    }

    pub fn running() -> Self {
        Self::with_state(ProviderState::Running)
    }

    pub fn succeeded(locator: impl Into<String>) -> Self {
        Self {
            output_locator: Some(locator.into()),
            ..Self::with_state(ProviderState::Succeeded)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::with_state(ProviderState::Failed)
        }
    }

    fn with_state(state: ProviderState) -> Self {
        Self {
            state,
            output_locator: None,
            error_message: None,
        }
    }
}

/// One job to be created at the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub owner_id: String,
    /// Echoed back in events so the caller can match results to requests.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Provider request body, built by the caller.
    pub payload: serde_json::Value,
}

/// What the provider hands back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub external_handle: String,
    pub correlation_echo: Option<String>,
}

/// Answers "what is the provider-side status of this operation?".
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Called once by the polling worker before it reports readiness.
    async fn warm_up(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn check(&self, external_handle: &str, owner_id: &str)
        -> Result<ProviderStatus, ProviderError>;
}

/// Creates operations at the provider.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmittedJob, ProviderError>;
}
