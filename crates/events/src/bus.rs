//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the single event stream of the tracker. "Notify the
//! caller that started a batch" and "notify every observer" are both just
//! subscriptions to it. It is designed to be shared via `Arc<EventBus>`.
//!
//! Delivery is at-most-once. A subscriber that falls more than the bus
//! capacity behind loses the oldest events it has not read yet; the loss is
//! reported only as a warning. Observers that must see every terminal
//! status should read the job store instead.

use tokio::sync::broadcast;

use crate::event::{EventEnvelope, TrackerEvent};

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`TrackerEvent`].
///
/// # Usage
///
/// ```rust
/// use reelq_events::EventBus;
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: TrackerEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(channel = envelope.channel, "Publishing tracker event");
        // A send error only means there are no receivers.
        let _ = self.sender.send(envelope);
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Subscribe to a single channel (see [`reelq_core::job_events`]).
    pub fn subscribe_channel(&self, channel: &'static str) -> ChannelSubscription {
        ChannelSubscription {
            channel,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscription that only yields events of one channel.
pub struct ChannelSubscription {
    channel: &'static str,
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl ChannelSubscription {
    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Wait for the next event on this channel.
    ///
    /// Returns `None` once the bus has been dropped. If this subscriber fell
    /// more than the bus capacity behind, the events it missed are gone:
    /// the gap is logged and `recv` continues with the oldest event still
    /// buffered.
    pub async fn recv(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.channel == self.channel => return Some(envelope.event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        channel = self.channel,
                        skipped = n,
                        "Channel subscriber lagged, some events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
