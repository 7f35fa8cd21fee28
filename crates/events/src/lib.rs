//! reelq event bus.
//!
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`TrackerEvent`] -- job status changes and batch lifecycle events.
//! - [`ChannelSubscription`] -- a subscriber that only sees one channel.

pub mod bus;
pub mod event;

pub use bus::{ChannelSubscription, EventBus};
pub use event::{BatchItemEvent, EventEnvelope, JobStatusEvent, TrackerEvent};
