//! Broadcast channel names for tracker events.
//!
//! Observers subscribe per channel; job status updates are routed by
//! [`JobKind`] so that a generation listener never sees upscale traffic.

use crate::job::JobKind;

/// Status changes of [`JobKind::Generation`] jobs.
pub const CHANNEL_GENERATION_STATUS: &str = "generation.status_changed";

/// Status changes of [`JobKind::Upscale`] jobs.
pub const CHANNEL_UPSCALE_STATUS: &str = "upscale.status_changed";

/// Batch lifecycle: start, per-item progress, completion.
pub const CHANNEL_BATCH: &str = "batch";

/// Channel that carries status changes for a given job kind.
pub fn status_channel(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Generation => CHANNEL_GENERATION_STATUS,
        JobKind::Upscale => CHANNEL_UPSCALE_STATUS,
    }
}
