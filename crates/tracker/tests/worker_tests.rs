//! Integration tests for the polling worker's sweep logic.
//!
//! Drives [`PollingWorker`] directly with explicit tick instants so the
//! attempt counting and interval rules are deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use reelq_core::job::{Job, JobResult, JobStatus};
use reelq_core::store::JobStore;
use reelq_db::MemoryJobStore;
use reelq_provider::error::ProviderError;
use reelq_provider::source::ProviderStatus;
use reelq_tracker::checker::StatusChecker;
use reelq_tracker::protocol::{AddJob, WorkerCommand, WorkerMessage};
use reelq_tracker::worker::PollingWorker;
use reelq_tracker::TrackerConfig;
use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{fast_config, seed, FakeSource};

const TICK: Duration = Duration::from_millis(20);

struct Rig {
    worker: PollingWorker,
    store: Arc<MemoryJobStore>,
    source: Arc<FakeSource>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

fn rig(config: TrackerConfig, source: FakeSource) -> Rig {
    let source = Arc::new(source);
    let store = Arc::new(MemoryJobStore::new());
    let checker = StatusChecker::new(source.clone(), store.clone());
    let (tx, rx) = mpsc::unbounded_channel();
    Rig {
        worker: PollingWorker::new(config, checker),
        store,
        source,
        tx,
        rx,
    }
}

impl Rig {
    fn track(&mut self, job: &Job) {
        let flow = self
            .worker
            .handle_command(WorkerCommand::Add(AddJob::from(job)), &self.tx);
        assert!(flow.is_continue());
    }

    fn drain(&mut self) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

fn updates(messages: &[WorkerMessage]) -> Vec<(JobStatus, Option<u8>, Option<String>)> {
    messages
        .iter()
        .filter_map(|m| match m {
            WorkerMessage::StatusUpdate { data, .. } => {
                Some((data.status, data.progress, data.error.clone()))
            }
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Test: completion
// ---------------------------------------------------------------------------

/// A succeeded check removes the job, persists Completed and reports 100%.
#[tokio::test]
async fn completed_job_is_persisted_and_dropped() {
    let mut rig = rig(
        fast_config(),
        FakeSource::with_fallback(ProviderStatus::succeeded("https://cdn.example/v1.mp4")),
    );
    let job = seed(&rig.store, "operations/1", JobStatus::Processing).await;
    rig.track(&job);

    let report = rig.worker.sweep(Instant::now(), &rig.tx).await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.completed, 1);
    assert!(rig.worker.registry().is_empty());

    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(
        stored.result,
        Some(JobResult::Output {
            locator: "https://cdn.example/v1.mp4".into()
        })
    );

    let messages = rig.drain();
    assert_matches!(
        messages.as_slice(),
        [WorkerMessage::StatusUpdate { data, .. }]
            if data.status == JobStatus::Completed
                && data.progress == Some(100)
                && data.output_locator.as_deref() == Some("https://cdn.example/v1.mp4")
                && data.correlation_id.as_deref() == Some("corr-operations/1")
    );
}

// ---------------------------------------------------------------------------
// Test: attempt budget
// ---------------------------------------------------------------------------

/// With `max_attempts = 3` and a job that never finishes, the third check
/// fails it with a timeout reason and nothing is checked afterwards.
#[tokio::test]
async fn job_times_out_after_max_attempts() {
    let config = TrackerConfig {
        max_attempts: 3,
        tick_interval: TICK,
        ..fast_config()
    };
    let mut rig = rig(config, FakeSource::running());
    let job = seed(&rig.store, "operations/2", JobStatus::Pending).await;
    rig.track(&job);

    let start = Instant::now();
    for n in 0..3 {
        rig.worker.sweep(start + TICK * n, &rig.tx).await;
    }
    let after = rig.worker.sweep(start + TICK * 3, &rig.tx).await;
    assert_eq!(after.checked, 0);
    assert_eq!(rig.source.checks(), 3);

    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        stored.result.as_ref().and_then(JobResult::error_message),
        Some("max attempts reached (3)")
    );

    assert_eq!(
        updates(&rig.drain()),
        vec![
            (JobStatus::Processing, Some(33), None),
            (JobStatus::Processing, Some(66), None),
            (
                JobStatus::Failed,
                None,
                Some("max attempts reached (3)".to_string())
            ),
        ]
    );
}

/// Restored jobs keep the attempts they already spent.
#[tokio::test]
async fn restored_attempts_count_against_budget() {
    let config = TrackerConfig {
        max_attempts: 5,
        ..fast_config()
    };
    let mut rig = rig(config, FakeSource::running());
    let mut job = seed(&rig.store, "operations/3", JobStatus::Processing).await;
    job.attempts = 4;
    rig.track(&job);

    let report = rig.worker.sweep(Instant::now(), &rig.tx).await;
    assert_eq!(report.failed, 1);
}

/// Checks that change nothing are still persisted, so a job rebuilt from
/// the store after a restart resumes with the attempts it already spent.
#[tokio::test]
async fn unchanged_checks_survive_restore() {
    let config = TrackerConfig {
        max_attempts: 8,
        tick_interval: TICK,
        ..fast_config()
    };
    let mut rig = rig(config.clone(), FakeSource::running());
    let job = seed(&rig.store, "operations/9", JobStatus::Processing).await;
    rig.track(&job);

    let start = Instant::now();
    for n in 0..5 {
        assert_eq!(rig.worker.sweep(start + TICK * n, &rig.tx).await.checked, 1);
    }
    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 5);
    assert_eq!(stored.status, JobStatus::Processing);
    assert!(stored.last_checked_at.is_some());

    // A fresh worker over the same store, as after a crash.
    let checker = StatusChecker::new(rig.source.clone(), rig.store.clone());
    let mut restarted = PollingWorker::new(config, checker);
    restarted.handle_command(WorkerCommand::Add(AddJob::from(&stored)), &rig.tx);
    assert_eq!(
        restarted.registry().get(job.id).map(|j| j.attempts),
        Some(5)
    );

    // Three more checks spend the remaining budget.
    for n in 0..3 {
        restarted.sweep(start + TICK * (10 + n), &rig.tx).await;
    }
    assert!(restarted.registry().is_empty());
    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 8);
}

// ---------------------------------------------------------------------------
// Test: interval
// ---------------------------------------------------------------------------

/// A job is never checked twice within one tick interval.
#[tokio::test]
async fn job_is_not_rechecked_within_interval() {
    let config = TrackerConfig {
        tick_interval: TICK,
        ..fast_config()
    };
    let mut rig = rig(config, FakeSource::running());
    let job = seed(&rig.store, "operations/4", JobStatus::Processing).await;
    rig.track(&job);

    let now = Instant::now();
    assert_eq!(rig.worker.sweep(now, &rig.tx).await.checked, 1);
    assert_eq!(rig.worker.sweep(now + TICK / 2, &rig.tx).await.checked, 0);
    assert_eq!(rig.worker.sweep(now + TICK, &rig.tx).await.checked, 1);
    assert_eq!(rig.source.checks(), 2);
}

// ---------------------------------------------------------------------------
// Test: error isolation
// ---------------------------------------------------------------------------

/// One failing check does not stop the rest of the sweep.
#[tokio::test]
async fn transient_error_is_isolated() {
    let mut rig = rig(fast_config(), FakeSource::running());
    let broken = seed(&rig.store, "operations/broken", JobStatus::Processing).await;
    let healthy = seed(&rig.store, "operations/healthy", JobStatus::Processing).await;
    rig.source.script(
        "operations/broken",
        vec![Err(ProviderError::Transient("connection reset".into()))],
    );
    rig.source.script(
        "operations/healthy",
        vec![Ok(ProviderStatus::succeeded("https://cdn.example/h.mp4"))],
    );
    rig.track(&broken);
    rig.track(&healthy);

    let report = rig.worker.sweep(Instant::now(), &rig.tx).await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.completed, 1);

    assert!(rig.worker.registry().get(broken.id).is_some());
    assert!(rig.worker.registry().get(healthy.id).is_none());
    let messages = rig.drain();
    assert!(messages
        .iter()
        .any(|m| matches!(m, WorkerMessage::Error { error } if error.contains("connection reset"))));
}

/// A provider-side failure becomes a terminal Failed with the provider's reason.
#[tokio::test]
async fn provider_failure_is_terminal() {
    let mut rig = rig(
        fast_config(),
        FakeSource::with_fallback(ProviderStatus::failed("content policy")),
    );
    let job = seed(&rig.store, "operations/5", JobStatus::Pending).await;
    rig.track(&job);

    let report = rig.worker.sweep(Instant::now(), &rig.tx).await;
    assert_eq!(report.failed, 1);
    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        updates(&rig.drain()),
        vec![(JobStatus::Failed, None, Some("content policy".to_string()))]
    );
}

/// A Processing job reported as queued stays Processing.
#[tokio::test]
async fn backwards_report_is_ignored() {
    let mut rig = rig(
        fast_config(),
        FakeSource::with_fallback(ProviderStatus::queued()),
    );
    let job = seed(&rig.store, "operations/6", JobStatus::Processing).await;
    rig.track(&job);

    rig.worker.sweep(Instant::now(), &rig.tx).await;
    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(
        rig.worker.registry().get(job.id).map(|j| j.status),
        Some(JobStatus::Processing)
    );
}

// ---------------------------------------------------------------------------
// Test: session expiry
// ---------------------------------------------------------------------------

/// An expired session suspends the job once and flags the update; resuming
/// the owner makes it eligible again. The refused check is still counted
/// in `attempts` but does not spend the budget.
#[tokio::test]
async fn expired_session_suspends_until_resumed() {
    let config = TrackerConfig {
        max_attempts: 2,
        tick_interval: TICK,
        ..fast_config()
    };
    let mut rig = rig(config, FakeSource::running());
    let job = seed(&rig.store, "operations/7", JobStatus::Processing).await;
    rig.source.script(
        "operations/7",
        vec![Err(ProviderError::SessionExpired {
            owner_id: "owner-1".into(),
            message: "login required".into(),
        })],
    );
    rig.track(&job);

    let start = Instant::now();
    rig.worker.sweep(start, &rig.tx).await;
    let messages = rig.drain();
    assert_matches!(
        messages.as_slice(),
        [WorkerMessage::StatusUpdate { data, .. }] if data.action_required
    );
    let tracked = rig.worker.registry().get(job.id).unwrap();
    assert!(tracked.suspended);
    assert_eq!(tracked.attempts, 1);
    assert_eq!(rig.source.checks(), 1);
    assert_eq!(tracked.budget_spent(), 0);

    assert_eq!(rig.worker.sweep(start + TICK * 10, &rig.tx).await.checked, 0);
    assert!(rig.drain().is_empty());

    rig.worker.handle_command(
        WorkerCommand::ResumeOwner {
            owner_id: "owner-1".into(),
        },
        &rig.tx,
    );
    let report = rig.worker.sweep(start + TICK * 11, &rig.tx).await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.failed, 0);

    let tracked = rig.worker.registry().get(job.id).unwrap();
    assert_eq!(tracked.attempts, 2);
    assert_eq!(rig.source.checks(), 2);
    let stored = rig.store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 2);
}

// ---------------------------------------------------------------------------
// Test: commands
// ---------------------------------------------------------------------------

/// Add is idempotent, remove is a no-op for unknown ids, shutdown breaks.
#[tokio::test]
async fn commands_are_idempotent() {
    let mut rig = rig(fast_config(), FakeSource::running());
    let job = seed(&rig.store, "operations/8", JobStatus::Pending).await;
    rig.track(&job);
    rig.track(&job);

    rig.worker.handle_command(WorkerCommand::GetQueue, &rig.tx);
    let messages = rig.drain();
    assert_matches!(
        messages.as_slice(),
        [WorkerMessage::QueueStatus { data }] if data.ids() == vec![job.id]
    );

    let tx = rig.tx.clone();
    rig.worker
        .handle_command(WorkerCommand::Remove { id: job.id }, &tx);
    rig.worker
        .handle_command(WorkerCommand::Remove { id: job.id }, &tx);
    assert!(rig.worker.registry().is_empty());

    assert!(rig
        .worker
        .handle_command(WorkerCommand::Shutdown, &tx)
        .is_break());
}
