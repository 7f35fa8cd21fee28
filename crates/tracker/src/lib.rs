//! Asynchronous job tracking core.
//!
//! A [`PollingWorker`](worker::PollingWorker) owns the live set of
//! in-flight jobs and polls the provider on a fixed tick from its own
//! thread and runtime. The [`Orchestrator`](orchestrator::Orchestrator)
//! supervises that worker, fans its notifications out on the event bus
//! and restarts it (then reconciles from the job store) if it crashes.
//! The [`BatchCoordinator`](batch::BatchCoordinator) submits many jobs
//! with a minimum spacing and hands each one to the orchestrator.

pub mod batch;
pub mod checker;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use batch::{
    BatchCoordinator, BatchItemResult, BatchOutcome, BatchTicket, CreateError, JobCreator,
    ProviderJobCreator,
};
pub use config::TrackerConfig;
pub use error::TrackerError;
pub use orchestrator::Orchestrator;
