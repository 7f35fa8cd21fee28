//! Rate-limited batch submission.
//!
//! Items are created one at a time, in order, with a fixed pause between
//! consecutive creations. Progress is reported on the `batch` channel of
//! the event bus: one `batch_started`, one `batch_item_progress` per item
//! in submission order, then one `batch_completed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelq_core::error::CoreError;
use reelq_core::job::Job;
use reelq_core::store::JobStore;
use reelq_core::types::{new_batch_id, BatchId, JobId};
use reelq_events::{BatchItemEvent, EventBus, TrackerEvent};
use reelq_provider::error::ProviderError;
use reelq_provider::source::{JobSubmitter, SubmitRequest};

use crate::orchestrator::Orchestrator;

/// Why a single job could not be created.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] CoreError),
}

impl CreateError {
    /// The owner has to act (e.g. sign in again) before retrying.
    pub fn requires_action(&self) -> bool {
        matches!(self, Self::Provider(e) if e.requires_action())
    }
}

/// Creates one job: provider submission plus the stored record.
#[async_trait]
pub trait JobCreator: Send + Sync {
    async fn create(&self, request: &SubmitRequest) -> Result<Job, CreateError>;
}

/// [`JobCreator`] that submits to the provider and records the job.
pub struct ProviderJobCreator {
    submitter: Arc<dyn JobSubmitter>,
    store: Arc<dyn JobStore>,
}

impl ProviderJobCreator {
    pub fn new(submitter: Arc<dyn JobSubmitter>, store: Arc<dyn JobStore>) -> Self {
        Self { submitter, store }
    }
}

#[async_trait]
impl JobCreator for ProviderJobCreator {
    async fn create(&self, request: &SubmitRequest) -> Result<Job, CreateError> {
        let submitted = self.submitter.submit(request).await?;
        let correlation_id = request
            .correlation_id
            .clone()
            .or(submitted.correlation_echo);
        let job = Job::new(
            request.kind,
            submitted.external_handle,
            request.owner_id.clone(),
            correlation_id,
        );
        self.store.create(&job).await?;
        Ok(job)
    }
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    pub index: usize,
    pub correlation_id: Option<String>,
    pub job_id: Option<JobId>,
    pub error: Option<String>,
    pub action_required: bool,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        self.job_id.is_some()
    }
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_id: BatchId,
    pub items: Vec<BatchItemResult>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// Returned immediately by [`BatchCoordinator::submit_background`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTicket {
    pub batch_id: BatchId,
    pub total: usize,
}

pub struct BatchCoordinator {
    creator: Arc<dyn JobCreator>,
    orchestrator: Arc<Orchestrator>,
    bus: Arc<EventBus>,
}

impl BatchCoordinator {
    pub fn new(creator: Arc<dyn JobCreator>, orchestrator: Arc<Orchestrator>) -> Self {
        let bus = Arc::clone(orchestrator.bus());
        Self {
            creator,
            orchestrator,
            bus,
        }
    }

    /// Create every request in order, pausing `delay` between items, and
    /// wait for the whole batch.
    pub async fn submit(&self, requests: Vec<SubmitRequest>, delay: Duration) -> BatchOutcome {
        self.run_batch(new_batch_id(), requests, delay).await
    }

    /// Like [`submit`](Self::submit) but returns as soon as the batch is
    /// scheduled; follow progress on the `batch` channel.
    pub fn submit_background(
        self: &Arc<Self>,
        requests: Vec<SubmitRequest>,
        delay: Duration,
    ) -> BatchTicket {
        let ticket = BatchTicket {
            batch_id: new_batch_id(),
            total: requests.len(),
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_batch(ticket.batch_id, requests, delay).await;
        });
        ticket
    }

    /// Create a single job and start tracking it.
    pub async fn submit_one(&self, request: &SubmitRequest) -> Result<Job, CreateError> {
        let job = self.creator.create(request).await?;
        self.track(&job).await;
        Ok(job)
    }

    async fn run_batch(
        &self,
        batch_id: BatchId,
        requests: Vec<SubmitRequest>,
        delay: Duration,
    ) -> BatchOutcome {
        let total = requests.len();
        tracing::info!(%batch_id, total, delay_ms = delay.as_millis() as u64, "Batch started");
        self.bus.publish(TrackerEvent::BatchStarted { batch_id, total });

        let mut items = Vec::with_capacity(total);
        for (index, request) in requests.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let item = self.dispatch(index, request).await;
            self.bus
                .publish(TrackerEvent::BatchItemProgress(BatchItemEvent {
                    batch_id,
                    index: item.index,
                    correlation_id: item.correlation_id.clone(),
                    success: item.is_success(),
                    job_id: item.job_id,
                    error: item.error.clone(),
                    action_required: item.action_required,
                }));
            items.push(item);
        }

        let success_count = items.iter().filter(|i| i.is_success()).count();
        let failure_count = total - success_count;
        tracing::info!(%batch_id, success_count, failure_count, total, "Batch completed");
        self.bus.publish(TrackerEvent::BatchCompleted {
            batch_id,
            success_count,
            failure_count,
            total,
        });

        BatchOutcome {
            batch_id,
            items,
            success_count,
            failure_count,
        }
    }

    async fn dispatch(&self, index: usize, request: &SubmitRequest) -> BatchItemResult {
        match self.creator.create(request).await {
            Ok(job) => {
                self.track(&job).await;
                BatchItemResult {
                    index,
                    correlation_id: job.correlation_id.clone(),
                    job_id: Some(job.id),
                    error: None,
                    action_required: false,
                }
            }
            Err(e) => {
                tracing::warn!(index, kind = %request.kind, error = %e, "Batch item failed");
                BatchItemResult {
                    index,
                    correlation_id: request.correlation_id.clone(),
                    job_id: None,
                    error: Some(e.to_string()),
                    action_required: e.requires_action(),
                }
            }
        }
    }

    /// Hand a created job to the orchestrator.
    ///
    /// The job already exists at the provider and in the store, so a
    /// tracking failure is only logged; the next reconciliation picks it up.
    async fn track(&self, job: &Job) {
        if let Err(e) = self.orchestrator.add_to_polling(job).await {
            tracing::warn!(
                job_id = %job.id,
                error = %e,
                "Job created but not yet tracked, will be picked up on reconciliation",
            );
        }
    }
}
