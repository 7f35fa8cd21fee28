//! The polling worker.
//!
//! Owns the live set of jobs and checks the eligible ones on every tick.
//! It is driven entirely by [`WorkerCommand`]s and reports through
//! [`WorkerMessage`]s, so the orchestrator can run it on a dedicated
//! thread with its own runtime and treat a panic as a crash.

use std::ops::ControlFlow;

use reelq_core::job::{estimate_progress, JobStatus, COMPLETED_PROGRESS};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::checker::{CheckOutcome, StatusChecker};
use crate::config::TrackerConfig;
use crate::error::WorkerError;
use crate::protocol::{JobUpdate, WorkerCommand, WorkerMessage};
use crate::registry::{JobRegistry, TrackedJob};

/// Counts for one sweep, used for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: usize,
}

pub struct PollingWorker {
    config: TrackerConfig,
    checker: StatusChecker,
    registry: JobRegistry,
}

impl PollingWorker {
    pub fn new(config: TrackerConfig, checker: StatusChecker) -> Self {
        Self {
            config,
            checker,
            registry: JobRegistry::new(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run until a `Shutdown` command, the command channel closing, or
    /// `cancel` firing.
    ///
    /// Warms up the status source first and only then sends
    /// [`WorkerMessage::Initialized`]. The first sweep happens immediately
    /// after that.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
        messages: mpsc::UnboundedSender<WorkerMessage>,
        cancel: CancellationToken,
    ) -> Result<(), WorkerError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkerError::Terminated),
            warm = self.checker.source().warm_up() => warm?,
        }

        if messages.send(WorkerMessage::Initialized).is_err() {
            return Ok(());
        }
        tracing::info!(
            tick_secs = self.config.tick_interval.as_secs_f64(),
            max_attempts = self.config.max_attempts,
            "Polling worker ready",
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(tracked = self.registry.len(), "Polling worker terminated");
                    return Err(WorkerError::Terminated);
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command, &messages).is_break() {
                            tracing::info!(tracked = self.registry.len(), "Polling worker stopped");
                            return Ok(());
                        }
                    }
                    None => {
                        tracing::info!("Command channel closed, polling worker stopping");
                        return Ok(());
                    }
                },
                tick = ticker.tick() => {
                    // A check that never returns must not outlive `cancel`.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::warn!(
                                tracked = self.registry.len(),
                                "Polling worker terminated mid-sweep",
                            );
                            return Err(WorkerError::Terminated);
                        }
                        _ = self.sweep(tick, &messages) => {}
                    }
                    if messages.is_closed() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply one command. `Break` means stop.
    pub fn handle_command(
        &mut self,
        command: WorkerCommand,
        messages: &mpsc::UnboundedSender<WorkerMessage>,
    ) -> ControlFlow<()> {
        match command {
            WorkerCommand::Add(add) => {
                let id = add.id;
                let kind = add.kind;
                if self.registry.add(TrackedJob::from(add)) {
                    tracing::debug!(job_id = %id, %kind, tracked = self.registry.len(), "Tracking job");
                } else {
                    tracing::debug!(job_id = %id, "Job already tracked or terminal, ignoring add");
                }
            }
            WorkerCommand::Remove { id } => {
                if self.registry.remove(id).is_some() {
                    tracing::debug!(job_id = %id, "Stopped tracking job");
                }
            }
            WorkerCommand::GetQueue => {
                let _ = messages.send(WorkerMessage::QueueStatus {
                    data: self.registry.snapshot(),
                });
            }
            WorkerCommand::ResumeOwner { owner_id } => {
                let resumed = self.registry.resume_owner(&owner_id);
                tracing::info!(%owner_id, resumed, "Resumed suspended jobs");
            }
            WorkerCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Check every job that is due at `now`, one at a time.
    ///
    /// A failing check is reported and isolated; the rest of the sweep
    /// continues.
    pub async fn sweep(
        &mut self,
        now: Instant,
        messages: &mpsc::UnboundedSender<WorkerMessage>,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for id in self.registry.eligible(now, self.config.tick_interval) {
            let Some(job) = self.registry.get_mut(id) else {
                continue;
            };
            job.attempts += 1;
            job.last_checked = Some(now);
            let job = job.clone();

            let outcome = self.checker.check(&job, chrono::Utc::now()).await;
            report.checked += 1;
            self.apply(job, outcome, messages, &mut report).await;
        }

        if report.checked > 0 {
            tracing::debug!(
                checked = report.checked,
                completed = report.completed,
                failed = report.failed,
                errors = report.errors,
                remaining = self.registry.len(),
                "Sweep finished",
            );
        }
        report
    }

    async fn apply(
        &mut self,
        job: TrackedJob,
        outcome: CheckOutcome,
        messages: &mpsc::UnboundedSender<WorkerMessage>,
        report: &mut SweepReport,
    ) {
        match outcome {
            CheckOutcome::Completed { output_locator } => {
                self.registry.remove(job.id);
                report.completed += 1;
                tracing::info!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "Job completed");
                emit(
                    messages,
                    &job,
                    JobUpdate {
                        status: JobStatus::Completed,
                        output_locator,
                        progress: Some(COMPLETED_PROGRESS),
                        ..update_for(&job)
                    },
                );
            }
            CheckOutcome::Failed { reason } => {
                self.registry.remove(job.id);
                report.failed += 1;
                tracing::info!(job_id = %job.id, kind = %job.kind, %reason, "Job failed");
                emit(
                    messages,
                    &job,
                    JobUpdate {
                        status: JobStatus::Failed,
                        error: Some(reason),
                        ..update_for(&job)
                    },
                );
            }
            CheckOutcome::SessionExpired(message) => {
                if let Some(tracked) = self.registry.get_mut(job.id) {
                    tracked.suspended = true;
                    tracked.suspended_checks += 1;
                }
                report.errors += 1;
                tracing::warn!(
                    job_id = %job.id,
                    owner_id = %job.owner_id,
                    "Owner session expired, suspending job",
                );
                emit(
                    messages,
                    &job,
                    JobUpdate {
                        error: Some(message),
                        action_required: true,
                        ..update_for(&job)
                    },
                );
            }
            CheckOutcome::CheckFailed(error) => {
                report.errors += 1;
                tracing::warn!(job_id = %job.id, attempts = job.attempts, %error, "Status check failed");
                let _ = messages.send(WorkerMessage::Error {
                    error: format!("status check for job {} failed: {error}", job.id),
                });
                if job.budget_spent() >= self.config.max_attempts {
                    self.exhaust(job, messages, report).await;
                }
            }
            CheckOutcome::Advanced(status) => {
                if let Some(tracked) = self.registry.get_mut(job.id) {
                    tracked.status = status;
                }
                let job = TrackedJob { status, ..job };
                self.still_running(job, messages, report).await;
            }
            CheckOutcome::Unchanged => self.still_running(job, messages, report).await,
        }
    }

    async fn still_running(
        &mut self,
        job: TrackedJob,
        messages: &mpsc::UnboundedSender<WorkerMessage>,
        report: &mut SweepReport,
    ) {
        if job.budget_spent() >= self.config.max_attempts {
            self.exhaust(job, messages, report).await;
            return;
        }
        emit(
            messages,
            &job,
            JobUpdate {
                progress: Some(estimate_progress(job.budget_spent(), self.config.max_attempts)),
                ..update_for(&job)
            },
        );
    }

    /// Fail a job whose check budget is spent.
    async fn exhaust(
        &mut self,
        job: TrackedJob,
        messages: &mpsc::UnboundedSender<WorkerMessage>,
        report: &mut SweepReport,
    ) {
        let reason = format!("max attempts reached ({})", self.config.max_attempts);
        self.checker.fail(&job, &reason, chrono::Utc::now()).await;
        self.registry.remove(job.id);
        report.failed += 1;
        tracing::warn!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "Job timed out");
        emit(
            messages,
            &job,
            JobUpdate {
                status: JobStatus::Failed,
                error: Some(reason),
                ..update_for(&job)
            },
        );
    }
}

/// Baseline update for `job` carrying its current status and nothing else.
fn update_for(job: &TrackedJob) -> JobUpdate {
    JobUpdate {
        id: job.id,
        correlation_id: job.correlation_id.clone(),
        status: job.status,
        output_locator: None,
        error: None,
        progress: None,
        action_required: false,
    }
}

fn emit(messages: &mpsc::UnboundedSender<WorkerMessage>, job: &TrackedJob, data: JobUpdate) {
    if messages
        .send(WorkerMessage::StatusUpdate {
            job_kind: job.kind,
            data,
        })
        .is_err()
    {
        tracing::debug!(job_id = %job.id, "Host gone, dropping status update");
    }
}

