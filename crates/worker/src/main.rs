//! `reelq-worker` -- job tracking daemon.
//!
//! Polls the provider for every in-flight Generation and Upscale job,
//! persists status transitions and logs every tracker event. Pending jobs
//! from a previous run are reconciled at startup.
//!
//! # Environment variables
//!
//! | Variable                | Required | Default | Description                                   |
//! |-------------------------|----------|---------|-----------------------------------------------|
//! | `PROVIDER_API_URL`      | yes      | --      | Base URL of the provider API                  |
//! | `DATABASE_URL`          | no       | --      | Postgres URL; in-memory store when unset      |
//! | `AUTOMATION_COMMAND`    | no       | --      | Automation process to launch before polling   |
//! | `AUTOMATION_PORT`       | no       | --      | Preferred remote-debugging port               |
//! | `BATCH_FILE`            | no       | --      | JSON array of submit requests to run at start |
//! | `BATCH_DELAY_MS`        | no       | `1000`  | Spacing between batch submissions             |
//! | `PROVIDER_TIMEOUT_SECS` | no       | `30`    | Per-request timeout for provider calls        |
//! | `EVENT_BUS_CAPACITY`    | no       | `1024`  | Events buffered per subscriber before loss    |
//!
//! Tracker tuning (`POLL_INTERVAL_SECS`, ...) is read by
//! [`TrackerConfig::from_env`].

use std::sync::Arc;
use std::time::Duration;

use reelq_core::store::JobStore;
use reelq_db::{MemoryJobStore, PgJobStore};
use reelq_events::bus::DEFAULT_CAPACITY as DEFAULT_EVENT_CAPACITY;
use reelq_events::EventBus;
use reelq_provider::api::{ProviderApi, DEFAULT_REQUEST_TIMEOUT};
use reelq_provider::automation::{AutomationChannel, AutomationConfig, ChannelEstablisher};
use reelq_provider::source::{JobSubmitter, StatusSource, SubmitRequest};
use reelq_tracker::{BatchCoordinator, Orchestrator, ProviderJobCreator, TrackerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BATCH_DELAY_MS: u64 = 1000;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelq_worker=info,reelq_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_url = std::env::var("PROVIDER_API_URL").unwrap_or_else(|_| {
        tracing::error!("PROVIDER_API_URL environment variable is required");
        std::process::exit(1);
    });

    let config = TrackerConfig::from_env();
    tracing::info!(
        api_url = %api_url,
        tick_secs = config.tick_interval.as_secs(),
        max_attempts = config.max_attempts,
        "Starting reelq-worker",
    );

    // --- Store ---
    let store: Arc<dyn JobStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => match PgJobStore::connect(&url).await {
            Ok(store) => {
                tracing::info!("Connected to job store database");
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open job store");
                std::process::exit(1);
            }
        },
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            Arc::new(MemoryJobStore::new())
        }
    };

    // --- Automation channel (optional) ---
    let startup_cancel = CancellationToken::new();
    let automation = launch_automation(&startup_cancel).await;

    // --- Tracker ---
    let request_timeout = std::env::var("PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
    let api = Arc::new(ProviderApi::with_timeout(api_url, request_timeout));
    let event_capacity = std::env::var("EVENT_BUS_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(DEFAULT_EVENT_CAPACITY);
    let bus = Arc::new(EventBus::new(event_capacity));
    let event_logger = tokio::spawn(log_events(bus.subscribe()));

    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&api) as Arc<dyn StatusSource>,
        Arc::clone(&store),
        Arc::clone(&bus),
    );

    if let Err(e) = orchestrator.initialize().await {
        tracing::error!(error = %e, "Polling worker failed to start");
        std::process::exit(1);
    }
    match orchestrator.restore_pending_jobs().await {
        Ok(restored) => tracing::info!(restored, "Startup reconciliation done"),
        Err(e) => tracing::error!(error = %e, "Startup reconciliation failed"),
    }

    // --- Startup batch (optional) ---
    let creator = Arc::new(ProviderJobCreator::new(
        Arc::clone(&api) as Arc<dyn JobSubmitter>,
        Arc::clone(&store),
    ));
    let batches = Arc::new(BatchCoordinator::new(creator, Arc::clone(&orchestrator)));
    if let Some((requests, delay)) = load_startup_batch() {
        let ticket = batches.submit_background(requests, delay);
        tracing::info!(batch_id = %ticket.batch_id, total = ticket.total, "Startup batch scheduled");
    }

    shutdown_signal().await;

    // --- Shutdown ---
    startup_cancel.cancel();
    orchestrator.shutdown().await;
    if let Some(channel) = automation {
        channel.close().await;
    }
    event_logger.abort();
    tracing::info!("reelq-worker stopped");
}

/// Launch the automation process when `AUTOMATION_COMMAND` is set.
///
/// Exits the process if the channel cannot be brought up.
async fn launch_automation(cancel: &CancellationToken) -> Option<AutomationChannel> {
    let command = std::env::var("AUTOMATION_COMMAND").ok()?;
    let preferred_port = std::env::var("AUTOMATION_PORT")
        .ok()
        .and_then(|v| v.parse().ok());

    let establisher = ChannelEstablisher::new(AutomationConfig {
        preferred_port,
        ..AutomationConfig::new(command)
    });

    match establisher.establish(cancel).await {
        Ok(channel) => {
            tracing::info!(
                port = channel.port(),
                debugger_url = channel.debugger_url(),
                "Automation channel ready",
            );
            Some(channel)
        }
        Err(e) => {
            tracing::error!(error = %e, "Automation channel unavailable");
            std::process::exit(1);
        }
    }
}

/// Read `BATCH_FILE`, if set, as a JSON array of [`SubmitRequest`]s.
fn load_startup_batch() -> Option<(Vec<SubmitRequest>, Duration)> {
    let path = std::env::var("BATCH_FILE").ok()?;
    let delay_ms: u64 = std::env::var("BATCH_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BATCH_DELAY_MS);

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Cannot read batch file");
            return None;
        }
    };
    match serde_json::from_str::<Vec<SubmitRequest>>(&raw) {
        Ok(requests) => Some((requests, Duration::from_millis(delay_ms))),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Invalid batch file");
            None
        }
    }
}

/// Log every tracker event until the bus closes.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<reelq_events::EventEnvelope>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(envelope) => match serde_json::to_string(&envelope.event) {
                Ok(json) => tracing::info!(channel = envelope.channel, event = %json, "Tracker event"),
                Err(e) => tracing::warn!(channel = envelope.channel, error = %e, "Unserializable event"),
            },
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event logger lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
