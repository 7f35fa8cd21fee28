//! Shared fakes and helpers for tracker integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reelq_core::job::{Job, JobKind, JobStatus};
use reelq_core::store::JobStore;
use reelq_db::MemoryJobStore;
use reelq_events::EventBus;
use reelq_provider::error::ProviderError;
use reelq_provider::source::{
    JobSubmitter, ProviderStatus, StatusSource, SubmitRequest, SubmittedJob,
};
use reelq_tracker::{Orchestrator, TrackerConfig};

// ---------------------------------------------------------------------------
// Configs
// ---------------------------------------------------------------------------

/// Short tick so real-time tests finish quickly.
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        tick_interval: Duration::from_millis(20),
        max_attempts: 360,
        init_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(1),
        restart_cooldown: Duration::from_millis(50),
        restart_attempts: 3,
    }
}

/// Tick long enough that no job is checked after the initial sweep.
pub fn idle_config() -> TrackerConfig {
    TrackerConfig {
        tick_interval: Duration::from_secs(3600),
        ..fast_config()
    }
}

// ---------------------------------------------------------------------------
// Fake status source
// ---------------------------------------------------------------------------

type Scripted = Result<ProviderStatus, ProviderError>;

/// Status source answering from per-handle scripts, then a fallback.
pub struct FakeSource {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallback: ProviderStatus,
    panic_next: AtomicBool,
    warm_up_delay: Option<Duration>,
    checks: AtomicUsize,
    /// Checks never return; set once a hung check is dropped.
    hang: bool,
    hung_released: AtomicBool,
    /// Warm-up succeeds only on the first start.
    fail_restarts: bool,
    warm_ups: AtomicUsize,
}

/// Sets its flag when the owning future is dropped.
struct ReleaseGuard<'a>(&'a AtomicBool);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl FakeSource {
    pub fn with_fallback(fallback: ProviderStatus) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            panic_next: AtomicBool::new(false),
            warm_up_delay: None,
            checks: AtomicUsize::new(0),
            hang: false,
            hung_released: AtomicBool::new(false),
            fail_restarts: false,
            warm_ups: AtomicUsize::new(0),
        }
    }

    /// Every job is reported as still running.
    pub fn running() -> Self {
        Self::with_fallback(ProviderStatus::running())
    }

    pub fn slow_warm_up(mut self, delay: Duration) -> Self {
        self.warm_up_delay = Some(delay);
        self
    }

    /// Every check blocks forever, ignoring timers and commands.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::running()
        }
    }

    /// Warm-up fails on every start after the first one.
    pub fn failing_restarts(mut self) -> Self {
        self.fail_restarts = true;
        self
    }

    pub fn script(&self, handle: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(handle.to_string(), responses.into());
    }

    /// Make the next check panic, crashing the worker thread.
    pub fn panic_on_next_check(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// Whether a hung check was abandoned by its worker.
    pub fn hung_released(&self) -> bool {
        self.hung_released.load(Ordering::SeqCst)
    }

    pub fn warm_ups(&self) -> usize {
        self.warm_ups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeSource {
    async fn warm_up(&self) -> Result<(), ProviderError> {
        let previous = self.warm_ups.fetch_add(1, Ordering::SeqCst);
        if self.fail_restarts && previous > 0 {
            return Err(ProviderError::Transient("provider unreachable".into()));
        }
        if let Some(delay) = self.warm_up_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn check(&self, handle: &str, _owner_id: &str) -> Result<ProviderStatus, ProviderError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("simulated polling worker crash");
        }
        if self.hang {
            let _guard = ReleaseGuard(&self.hung_released);
            std::future::pending::<()>().await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(handle)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

// ---------------------------------------------------------------------------
// Fake submitter
// ---------------------------------------------------------------------------

/// Accepts every submission except those whose correlation id is listed.
#[derive(Default)]
pub struct FakeSubmitter {
    rejected: HashSet<String>,
    expired: HashSet<String>,
    submitted: AtomicUsize,
}

impl FakeSubmitter {
    pub fn rejecting(mut self, correlation_id: &str) -> Self {
        self.rejected.insert(correlation_id.to_string());
        self
    }

    pub fn session_expired_for(mut self, correlation_id: &str) -> Self {
        self.expired.insert(correlation_id.to_string());
        self
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSubmitter for FakeSubmitter {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmittedJob, ProviderError> {
        let correlation = request.correlation_id.clone().unwrap_or_default();
        if self.rejected.contains(&correlation) {
            return Err(ProviderError::Rejected {
                status: 400,
                body: "invalid prompt".into(),
            });
        }
        if self.expired.contains(&correlation) {
            return Err(ProviderError::SessionExpired {
                owner_id: request.owner_id.clone(),
                message: "login required".into(),
            });
        }
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmittedJob {
            external_handle: format!("operations/{n}"),
            correlation_echo: request.correlation_id.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub store: Arc<MemoryJobStore>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn harness(config: TrackerConfig, source: FakeSource) -> Harness {
    let source = Arc::new(source);
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(
        config,
        Arc::clone(&source) as Arc<dyn StatusSource>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&bus),
    );
    Harness {
        source,
        store,
        bus,
        orchestrator,
    }
}

/// Insert a job with the given handle and status into the store.
pub async fn seed(store: &MemoryJobStore, handle: &str, status: JobStatus) -> Job {
    let job = Job::new(JobKind::Generation, handle, "owner-1", Some(format!("corr-{handle}")))
        .with_status(status);
    store.create(&job).await.expect("seed job");
    job
}

pub fn request(kind: JobKind, correlation_id: &str) -> SubmitRequest {
    SubmitRequest {
        kind,
        owner_id: "owner-1".into(),
        correlation_id: Some(correlation_id.to_string()),
        payload: serde_json::json!({ "prompt": "a lighthouse at dusk" }),
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
