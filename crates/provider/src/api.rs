//! REST client for the generation provider's operations API.
//!
//! Wraps job submission (`POST /v1/operations`), status lookup
//! (`GET /v1/operations/{name}`) and the health check using [`reqwest`].
//! Implements both [`JobSubmitter`] and [`StatusSource`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backoff::{retry_with_backoff, BackoffConfig, RetryError};
use crate::error::ProviderError;
use crate::source::{
    JobSubmitter, ProviderState, ProviderStatus, StatusSource, SubmitRequest, SubmittedJob,
};

/// Header carrying the account/session context of a call.
const OWNER_HEADER: &str = "x-owner-id";

/// Upper bound on a single request, so a stalled provider cannot hang a
/// status check forever.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the provider API.
pub struct ProviderApi {
    client: reqwest::Client,
    api_url: String,
    warm_up_backoff: BackoffConfig,
}

/// Response returned after a successful submission.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    /// Server-assigned operation name, e.g. `operations/1234`.
    name: String,
    #[serde(default)]
    correlation_id: Option<String>,
}

/// Body of `POST /v1/operations`.
#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    kind: &'a str,
    correlation_id: Option<&'a str>,
    input: &'a serde_json::Value,
}

/// Response of `GET /v1/operations/{name}`.
#[derive(Debug, Deserialize)]
struct OperationResponse {
    state: ProviderState,
    #[serde(default)]
    output_uri: Option<String>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: String,
}

impl ProviderApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `https://provider.example`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_timeout(api_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create an API client whose requests give up after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            warm_up_backoff: BackoffConfig::default(),
        }
    }

    /// Override the backoff used while waiting for the API to come up.
    pub fn with_warm_up_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.warm_up_backoff = backoff;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Single `GET /health` request.
    async fn check_health(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;
        Self::ensure_success(response, None).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code.
    ///
    /// 401/403 become [`ProviderError::SessionExpired`] (when the owner is
    /// known), 429 and 5xx become [`ProviderError::Transient`], anything
    /// else is [`ProviderError::Rejected`].
    async fn ensure_success(
        response: reqwest::Response,
        owner_id: Option<&str>,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        Err(classify_status(status.as_u16(), body, owner_id))
    }
}

/// Map a non-2xx HTTP status onto the provider error taxonomy.
fn classify_status(status: u16, body: String, owner_id: Option<&str>) -> ProviderError {
    match (status, owner_id) {
        (401 | 403, Some(owner)) => ProviderError::SessionExpired {
            owner_id: owner.to_string(),
            message: body,
        },
        (429, _) | (500..=599, _) => ProviderError::Transient(format!("HTTP {status}: {body}")),
        _ => ProviderError::Rejected { status, body },
    }
}

#[async_trait]
impl JobSubmitter for ProviderApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmittedJob, ProviderError> {
        let body = SubmitBody {
            kind: request.kind.as_str(),
            correlation_id: request.correlation_id.as_deref(),
            input: &request.payload,
        };

        let response = self
            .client
            .post(format!("{}/v1/operations", self.api_url))
            .header(OWNER_HEADER, &request.owner_id)
            .json(&body)
            .send()
            .await?;

        let response = Self::ensure_success(response, Some(&request.owner_id)).await?;
        let parsed: SubmitResponse = response.json().await?;

        tracing::info!(
            kind = %request.kind,
            operation = %parsed.name,
            "Operation submitted to provider",
        );

        Ok(SubmittedJob {
            external_handle: parsed.name,
            correlation_echo: parsed.correlation_id,
        })
    }
}

#[async_trait]
impl StatusSource for ProviderApi {
    /// Wait for the provider API to answer its health check.
    async fn warm_up(&self) -> Result<(), ProviderError> {
        let cancel = CancellationToken::new();
        retry_with_backoff("provider health check", &self.warm_up_backoff, &cancel, |_| {
            self.check_health()
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Cancelled => ProviderError::Transient("health check cancelled".into()),
        })
    }

    async fn check(
        &self,
        external_handle: &str,
        owner_id: &str,
    ) -> Result<ProviderStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/{}", self.api_url, external_handle))
            .header(OWNER_HEADER, owner_id)
            .send()
            .await?;

        let response = Self::ensure_success(response, Some(owner_id)).await?;
        let op: OperationResponse = response.json().await?;

        Ok(ProviderStatus {
            state: op.state,
            output_locator: op.output_uri,
            error_message: op.error.map(|e| e.message),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn auth_failures_become_session_errors() {
        let err = classify_status(401, "token expired".into(), Some("owner-7"));
        assert!(err.requires_action());
        assert_matches!(err, ProviderError::SessionExpired { ref owner_id, .. } if owner_id == "owner-7");
    }

    #[test]
    fn server_errors_are_transient() {
        assert_matches!(classify_status(503, String::new(), Some("o")), ProviderError::Transient(_));
        assert_matches!(classify_status(429, String::new(), None), ProviderError::Transient(_));
    }

    #[test]
    fn client_errors_are_rejections() {
        assert_matches!(
            classify_status(400, "bad prompt".into(), Some("o")),
            ProviderError::Rejected { status: 400, .. }
        );
        // Without an owner there is no session to blame.
        assert_matches!(classify_status(403, String::new(), None), ProviderError::Rejected { .. });
    }

    #[test]
    fn operation_response_parses_failure() {
        let op: OperationResponse = serde_json::from_str(
            r#"{"state": "failed", "error": {"message": "content policy"}}"#,
        )
        .unwrap();
        assert_eq!(op.state, ProviderState::Failed);
        assert_eq!(op.error.map(|e| e.message).as_deref(), Some("content policy"));
    }

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let api = ProviderApi::new("http://localhost:9000/");
        assert_eq!(api.api_url(), "http://localhost:9000");
    }

    #[tokio::test]
    async fn stalled_check_times_out_as_transient() {
        // Accepts connections but never writes a response.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let api = ProviderApi::with_timeout(format!("http://{addr}"), Duration::from_millis(200));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            api.check("operations/1", "owner-1"),
        )
        .await
        .expect("request timeout should fire first");

        assert_matches!(result, Err(ProviderError::Transient(_)));
        server.abort();
    }
}
