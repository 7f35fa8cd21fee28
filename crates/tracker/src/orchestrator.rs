//! Lifecycle owner of the polling worker.
//!
//! The orchestrator runs the [`PollingWorker`] on a dedicated OS thread
//! with a current-thread runtime, so a panic or a runaway sweep never
//! touches the host's runtime. A supervisor task per worker generation
//! forwards status updates to the [`EventBus`], answers queue queries,
//! and on an unexpected exit schedules a restart followed by a
//! reconciliation from the [`JobStore`].

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use reelq_core::job::{Job, JobKind, JobStatus};
use reelq_core::store::JobStore;
use reelq_core::types::JobId;
use reelq_events::{EventBus, JobStatusEvent, TrackerEvent};
use reelq_provider::backoff::{retry_with_backoff, BackoffConfig};
use reelq_provider::source::StatusSource;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::checker::StatusChecker;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::protocol::{AddJob, JobUpdate, QueueSnapshot, WorkerCommand, WorkerMessage};
use crate::worker::PollingWorker;

/// How a worker thread ended.
#[derive(Debug)]
enum WorkerExit {
    Clean,
    Failed(String),
    Panicked(String),
}

/// The running worker generation.
struct WorkerHandle {
    epoch: u64,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    /// Force-terminates the worker's run loop.
    cancel: CancellationToken,
    /// Cancelled by the supervisor once the worker thread has exited.
    stopped: CancellationToken,
    ready: bool,
}

pub struct Orchestrator {
    config: TrackerConfig,
    checker: StatusChecker,
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    worker: RwLock<Option<WorkerHandle>>,
    /// Callers of `queue_status()` waiting for the worker's reply, FIFO.
    queue_waiters: Mutex<VecDeque<oneshot::Sender<QueueSnapshot>>>,
    /// Serializes `initialize()` calls.
    init_lock: Mutex<()>,
    epoch: AtomicU64,
    restarts: AtomicU64,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        config: TrackerConfig,
        source: Arc<dyn StatusSource>,
        store: Arc<dyn JobStore>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            checker: StatusChecker::new(source, Arc::clone(&store)),
            config,
            store,
            bus,
            worker: RwLock::new(None),
            queue_waiters: Mutex::new(VecDeque::new()),
            init_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Whether a worker is running and has signalled readiness.
    pub async fn is_initialized(&self) -> bool {
        self.worker.read().await.as_ref().is_some_and(|h| h.ready)
    }

    /// Number of crash restarts performed so far.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Start the polling worker and wait for its readiness signal.
    ///
    /// A no-op when a ready worker is already running. Fails with
    /// [`TrackerError::InitTimeout`] (after terminating the half-started
    /// worker) if readiness does not arrive within `init_timeout`.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), TrackerError> {
        self.shutting_down.store(false, Ordering::SeqCst);
        self.start_worker().await
    }

    async fn start_worker(self: &Arc<Self>) -> Result<(), TrackerError> {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized().await {
            return Ok(());
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();

        let worker = PollingWorker::new(self.config.clone(), self.checker.clone());
        spawn_worker_thread(epoch, worker, cmd_rx, msg_tx, cancel.clone(), exit_tx)?;

        *self.worker.write().await = Some(WorkerHandle {
            epoch,
            commands: cmd_tx,
            cancel: cancel.clone(),
            stopped: stopped.clone(),
            ready: false,
        });
        tokio::spawn(Arc::clone(self).supervise(epoch, msg_rx, exit_rx, ready_tx, stopped));

        match tokio::time::timeout(self.config.init_timeout, ready_rx).await {
            Ok(Ok(())) => {
                let mut slot = self.worker.write().await;
                match slot.as_mut() {
                    Some(handle) if handle.epoch == epoch => {
                        handle.ready = true;
                        tracing::info!(epoch, "Polling worker initialized");
                        Ok(())
                    }
                    _ => Err(TrackerError::WorkerExited(
                        "worker exited right after becoming ready".into(),
                    )),
                }
            }
            Ok(Err(_)) => {
                self.clear_handle(epoch).await;
                Err(TrackerError::WorkerExited(
                    "worker stopped before signalling readiness".into(),
                ))
            }
            Err(_) => {
                self.clear_handle(epoch).await;
                cancel.cancel();
                tracing::error!(
                    epoch,
                    timeout_secs = self.config.init_timeout.as_secs_f64(),
                    "Polling worker did not become ready, terminated",
                );
                Err(TrackerError::InitTimeout(self.config.init_timeout))
            }
        }
    }

    /// Hand a job to the worker. Terminal jobs are refused.
    pub async fn add_to_polling(&self, job: &Job) -> Result<(), TrackerError> {
        if job.is_terminal() {
            return Err(TrackerError::TerminalJob(job.id));
        }
        self.send(WorkerCommand::Add(AddJob::from(job))).await?;
        tracing::debug!(job_id = %job.id, kind = %job.kind, "Job queued for polling");
        Ok(())
    }

    /// Ask the worker to stop tracking a job.
    ///
    /// Advisory: a check already in flight still completes and may emit
    /// one more update.
    pub async fn remove_from_polling(&self, id: JobId) -> Result<(), TrackerError> {
        self.send(WorkerCommand::Remove { id }).await
    }

    /// Clear session suspension for every job of `owner_id`.
    pub async fn resume_owner(&self, owner_id: &str) -> Result<(), TrackerError> {
        self.send(WorkerCommand::ResumeOwner {
            owner_id: owner_id.to_string(),
        })
        .await
    }

    /// The worker's current live set.
    pub async fn queue_status(&self) -> Result<QueueSnapshot, TrackerError> {
        let (tx, rx) = oneshot::channel();
        self.queue_waiters.lock().await.push_back(tx);
        if let Err(e) = self.send(WorkerCommand::GetQueue).await {
            // No reply is coming; drop our waiter and any other abandoned one.
            drop(rx);
            self.queue_waiters
                .lock()
                .await
                .retain(|waiter| !waiter.is_closed());
            return Err(e);
        }

        match tokio::time::timeout(self.config.init_timeout, rx).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            _ => Err(TrackerError::WorkerUnavailable),
        }
    }

    /// Re-queue every non-terminal job from the store.
    ///
    /// Safe to call repeatedly: the worker ignores ids it already tracks.
    pub async fn restore_pending_jobs(&self) -> Result<usize, TrackerError> {
        let jobs = self.store.list_by_status(&JobStatus::NON_TERMINAL).await?;
        for job in &jobs {
            self.add_to_polling(job).await?;
        }
        tracing::info!(restored = jobs.len(), "Reconciled pending jobs from store");
        Ok(jobs.len())
    }

    /// Stop the worker, gracefully if possible.
    ///
    /// Sends `Shutdown` and waits up to `shutdown_timeout`; after that the
    /// worker is force-terminated and given another `shutdown_timeout` to
    /// exit. Crash recovery is disabled from here on.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let Some(handle) = self.worker.write().await.take() else {
            tracing::debug!("Polling worker not running, nothing to shut down");
            return;
        };

        let _ = handle.commands.send(WorkerCommand::Shutdown);
        match tokio::time::timeout(self.config.shutdown_timeout, handle.stopped.cancelled()).await
        {
            Ok(()) => tracing::info!(epoch = handle.epoch, "Polling worker shut down"),
            Err(_) => {
                tracing::warn!(
                    epoch = handle.epoch,
                    "Polling worker did not stop in time, force-terminating",
                );
                handle.cancel.cancel();
                match tokio::time::timeout(self.config.shutdown_timeout, handle.stopped.cancelled())
                    .await
                {
                    Ok(()) => tracing::info!(epoch = handle.epoch, "Polling worker terminated"),
                    Err(_) => tracing::error!(
                        epoch = handle.epoch,
                        "Polling worker ignored termination, abandoning its thread",
                    ),
                }
            }
        }
    }

    async fn send(&self, command: WorkerCommand) -> Result<(), TrackerError> {
        let slot = self.worker.read().await;
        let Some(handle) = slot.as_ref().filter(|h| h.ready) else {
            tracing::error!(?command, "Polling worker not initialized, command dropped");
            return Err(TrackerError::NotInitialized);
        };
        handle.commands.send(command).map_err(|_| {
            tracing::error!(epoch = handle.epoch, "Polling worker command channel closed");
            TrackerError::WorkerUnavailable
        })
    }

    async fn clear_handle(&self, epoch: u64) -> bool {
        let mut slot = self.worker.write().await;
        if slot.as_ref().is_some_and(|h| h.epoch == epoch) {
            *slot = None;
            true
        } else {
            false
        }
    }

    // ---- supervision ----

    async fn supervise(
        self: Arc<Self>,
        epoch: u64,
        mut messages: mpsc::UnboundedReceiver<WorkerMessage>,
        exit: oneshot::Receiver<WorkerExit>,
        ready: oneshot::Sender<()>,
        stopped: CancellationToken,
    ) {
        let mut ready = Some(ready);
        let mut was_ready = false;

        while let Some(message) = messages.recv().await {
            match message {
                WorkerMessage::Initialized => {
                    was_ready = true;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(());
                    }
                }
                WorkerMessage::StatusUpdate { job_kind, data } => {
                    self.broadcast_update(job_kind, data);
                }
                WorkerMessage::QueueStatus { data } => self.answer_queue_waiter(data).await,
                WorkerMessage::Error { error } => {
                    tracing::warn!(epoch, %error, "Polling worker reported an error");
                }
            }
        }
        drop(ready);

        let exit = exit
            .await
            .unwrap_or_else(|_| WorkerExit::Panicked("worker thread vanished".into()));
        stopped.cancel();
        self.handle_exit(epoch, exit, was_ready).await;
    }

    fn broadcast_update(&self, kind: JobKind, update: JobUpdate) {
        if update.status.is_terminal() {
            tracing::info!(
                job_id = %update.id,
                %kind,
                status = ?update.status,
                "Job reached terminal status",
            );
        }
        self.bus.publish(TrackerEvent::JobStatusChanged(JobStatusEvent {
            id: update.id,
            kind,
            correlation_id: update.correlation_id,
            status: update.status,
            output_locator: update.output_locator,
            error: update.error,
            progress: update.progress,
            action_required: update.action_required,
        }));
    }

    async fn answer_queue_waiter(&self, mut snapshot: QueueSnapshot) {
        let mut waiters = self.queue_waiters.lock().await;
        // Waiters that already gave up have dropped their receiver.
        while let Some(waiter) = waiters.pop_front() {
            match waiter.send(snapshot) {
                Ok(()) => return,
                Err(returned) => snapshot = returned,
            }
        }
    }

    async fn handle_exit(self: Arc<Self>, epoch: u64, exit: WorkerExit, was_ready: bool) {
        let current = self.clear_handle(epoch).await;
        if current {
            self.queue_waiters.lock().await.clear();
        }

        match &exit {
            WorkerExit::Clean => {
                tracing::info!(epoch, "Polling worker exited");
                return;
            }
            WorkerExit::Failed(reason) => {
                tracing::error!(epoch, %reason, "Polling worker exited with an error");
            }
            WorkerExit::Panicked(reason) => {
                tracing::error!(epoch, %reason, "Polling worker panicked");
            }
        }

        if current && was_ready && !self.shutting_down.load(Ordering::SeqCst) {
            tokio::spawn(self.recover());
        }
    }

    /// Restart after a crash, then reconcile the live set from the store.
    fn recover(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let restart = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                restart,
                cooldown_ms = self.config.restart_cooldown.as_millis() as u64,
                "Restarting polling worker after cooldown",
            );
            tokio::time::sleep(self.config.restart_cooldown).await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let backoff = BackoffConfig {
                initial_delay: self.config.restart_cooldown,
                max_delay: self.config.restart_cooldown * 4,
                ..BackoffConfig::default()
            }
            .with_max_attempts(self.config.restart_attempts);

            let restarted = retry_with_backoff(
                "polling worker restart",
                &backoff,
                &CancellationToken::new(),
                |_| {
                    let this = Arc::clone(&self);
                    async move {
                        if this.shutting_down.load(Ordering::SeqCst) {
                            return Ok(());
                        }
                        this.start_worker().await
                    }
                },
            )
            .await;

            if let Err(e) = restarted {
                tracing::error!(restart, error = %e, "Polling worker could not be restarted");
                return;
            }
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            match self.restore_pending_jobs().await {
                Ok(restored) => {
                    tracing::info!(restart, restored, "Polling worker recovered");
                }
                Err(e) => {
                    tracing::error!(restart, error = %e, "Reconciliation after restart failed");
                }
            }
        })
    }
}

/// Run `worker` on its own thread and runtime; report how it ended on `exit`.
fn spawn_worker_thread(
    epoch: u64,
    worker: PollingWorker,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
    cancel: CancellationToken,
    exit: oneshot::Sender<WorkerExit>,
) -> Result<(), TrackerError> {
    std::thread::Builder::new()
        .name(format!("reelq-poller-{epoch}"))
        .spawn(move || {
            let outcome = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Err(e) => WorkerExit::Failed(format!("failed to build worker runtime: {e}")),
                Ok(runtime) => {
                    let run = AssertUnwindSafe(|| {
                        runtime.block_on(worker.run(commands, messages, cancel))
                    });
                    match std::panic::catch_unwind(run) {
                        Ok(Ok(())) => WorkerExit::Clean,
                        Ok(Err(e)) => WorkerExit::Failed(e.to_string()),
                        Err(payload) => WorkerExit::Panicked(panic_message(payload.as_ref())),
                    }
                }
            };
            let _ = exit.send(outcome);
        })
        .map_err(|e| TrackerError::WorkerSpawn(e.to_string()))?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use reelq_db::MemoryJobStore;
    use reelq_provider::error::ProviderError;
    use reelq_provider::source::ProviderStatus;

    use super::*;

    struct IdleSource;

    #[async_trait]
    impl StatusSource for IdleSource {
        async fn check(&self, _: &str, _: &str) -> Result<ProviderStatus, ProviderError> {
            Ok(ProviderStatus::running())
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Orchestrator::new(
            TrackerConfig::default(),
            Arc::new(IdleSource),
            Arc::new(MemoryJobStore::new()),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn refused_queue_query_leaves_no_waiter() {
        let orchestrator = orchestrator();
        for _ in 0..3 {
            assert!(matches!(
                orchestrator.queue_status().await,
                Err(TrackerError::NotInitialized)
            ));
        }
        assert!(orchestrator.queue_waiters.lock().await.is_empty());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
