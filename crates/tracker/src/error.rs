use std::time::Duration;

use reelq_core::error::CoreError;
use reelq_core::types::JobId;

/// Errors surfaced by the orchestrator to its caller.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// No ready polling worker; call `initialize()` first.
    #[error("Polling worker is not initialized")]
    NotInitialized,

    /// The worker did not signal readiness in time.
    #[error("Polling worker did not become ready within {0:?}")]
    InitTimeout(Duration),

    /// The worker stopped before it became ready.
    #[error("Polling worker exited during startup: {0}")]
    WorkerExited(String),

    /// The worker thread could not be started.
    #[error("Failed to start polling worker: {0}")]
    WorkerSpawn(String),

    /// The worker's command channel is closed or it stopped answering.
    #[error("Polling worker is unavailable")]
    WorkerUnavailable,

    /// Terminal jobs are never re-queued.
    #[error("Job {0} is already terminal and cannot be tracked")]
    TerminalJob(JobId),

    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Why a polling worker's run loop ended with an error.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("status source warm-up failed: {0}")]
    WarmUp(#[from] reelq_provider::error::ProviderError),

    #[error("worker force-terminated")]
    Terminated,
}
