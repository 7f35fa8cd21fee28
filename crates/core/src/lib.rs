//! Domain types shared by every reelq crate.
//!
//! - [`job`] -- the tracked [`Job`](job::Job) record and its state machine.
//! - [`store`] -- the persisted job registry collaborator trait.
//! - [`job_events`] -- broadcast channel names and event type constants.

pub mod error;
pub mod job;
pub mod job_events;
pub mod store;
pub mod types;
