//! Provider error taxonomy.
//!
//! The tracker treats [`ProviderError::SessionExpired`] differently from
//! every other variant: it is surfaced to a human instead of being
//! retried on the next tick.

/// Errors from status checks and job submissions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout, 5xx or rate limiting. Retry later.
    #[error("Transient provider failure: {0}")]
    Transient(String),

    /// Credentials for the owner were refused. Needs a human.
    #[error("Session expired for owner '{owner_id}': {message}")]
    SessionExpired { owner_id: String, message: String },

    /// The provider refused the request outright.
    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The response could not be understood.
    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether this failure must be passed to a human rather than retried.
    pub fn requires_action(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}
