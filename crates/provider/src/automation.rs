//! Automation channel establisher.
//!
//! Status checks for some providers go through a locally launched
//! automation process (a headless browser exposing a remote-debugging
//! port). [`ChannelEstablisher`] picks a port, launches the process,
//! and waits for its `/json/version` endpoint with exponential backoff.
//! If the endpoint never comes up, the half-started process is killed
//! before the error is returned.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::backoff::{retry_with_backoff, BackoffConfig, RetryError};

/// Placeholder in [`AutomationConfig::args`] replaced by the chosen port.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// How to launch and reach the automation process.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Executable to launch.
    pub command: String,
    /// Arguments; every `{port}` is substituted with the discovered port.
    pub args: Vec<String>,
    /// Port to prefer. Falls back to an ephemeral port when taken.
    pub preferred_port: Option<u16>,
    pub backoff: BackoffConfig,
}

impl AutomationConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec![
                "--headless=new".to_string(),
                format!("--remote-debugging-port={PORT_PLACEHOLDER}"),
            ],
            preferred_port: None,
            backoff: BackoffConfig::default(),
        }
    }
}

/// A ready automation endpoint.
///
/// Owns the launched process, if any; dropping the channel kills it.
#[derive(Debug)]
pub struct AutomationChannel {
    port: u16,
    debugger_url: String,
    child: Option<Child>,
}

impl AutomationChannel {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL reported by the endpoint's `/json/version`.
    pub fn debugger_url(&self) -> &str {
        &self.debugger_url
    }

    /// Terminate the launched process (no-op when attached to an existing one).
    pub async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.port).await;
        }
    }
}

/// Errors while bringing up the automation channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("No usable local port: {0}")]
    Port(#[source] std::io::Error),

    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Automation endpoint on port {port} not ready after {attempts} attempts: {last_error}")]
    NotReady {
        port: u16,
        attempts: u32,
        last_error: String,
    },

    #[error("Automation channel setup cancelled")]
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Launches (or attaches to) the automation endpoint.
pub struct ChannelEstablisher {
    config: AutomationConfig,
    client: reqwest::Client,
}

impl ChannelEstablisher {
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Launch the automation process and wait until it answers.
    pub async fn establish(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AutomationChannel, ConnectError> {
        let port = discover_port(self.config.preferred_port)?;
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|a| a.replace(PORT_PLACEHOLDER, &port.to_string()))
            .collect();

        tracing::info!(command = %self.config.command, port, "Launching automation process");

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        match self.wait_ready(port, cancel).await {
            Ok(debugger_url) => Ok(AutomationChannel {
                port,
                debugger_url,
                child: Some(child),
            }),
            Err(e) => {
                if let Ok(Some(status)) = child.try_wait() {
                    tracing::warn!(port, %status, "Automation process exited before becoming ready");
                }
                terminate(&mut child, port).await;
                Err(e)
            }
        }
    }

    /// Attach to an endpoint somebody else launched.
    pub async fn attach(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<AutomationChannel, ConnectError> {
        let debugger_url = self.wait_ready(port, cancel).await?;
        Ok(AutomationChannel {
            port,
            debugger_url,
            child: None,
        })
    }

    async fn wait_ready(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<String, ConnectError> {
        retry_with_backoff("automation endpoint", &self.config.backoff, cancel, |_| {
            self.fetch_version(port)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => ConnectError::NotReady {
                port,
                attempts,
                last_error,
            },
            RetryError::Cancelled => ConnectError::Cancelled,
        })
    }

    /// One `GET /json/version` request.
    async fn fetch_version(&self, port: u16) -> Result<String, String> {
        let response = self
            .client
            .get(format!("http://127.0.0.1:{port}/json/version"))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let info: VersionInfo = response.json().await.map_err(|e| e.to_string())?;
        Ok(info.web_socket_debugger_url)
    }
}

/// Pick the preferred port if it can be bound, otherwise an ephemeral one.
pub fn discover_port(preferred: Option<u16>) -> Result<u16, ConnectError> {
    if let Some(port) = preferred {
        if TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok() {
            return Ok(port);
        }
        tracing::debug!(port, "Preferred automation port busy, using an ephemeral port");
    }

    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .map_err(ConnectError::Port)?;
    let port = listener.local_addr().map_err(ConnectError::Port)?.port();
    Ok(port)
}

async fn terminate(child: &mut Child, port: u16) {
    if let Err(e) = child.kill().await {
        tracing::warn!(port, error = %e, "Failed to kill automation process");
    } else {
        tracing::info!(port, "Automation process terminated");
    }
}
