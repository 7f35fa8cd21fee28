//! Provider-side collaborators for the job tracker.
//!
//! Defines the [`StatusSource`](source::StatusSource) and
//! [`JobSubmitter`](source::JobSubmitter) seams the tracker depends on,
//! an HTTP implementation of both, exponential-backoff retry, and the
//! automation channel establisher used to bring up the endpoint that
//! status checks go through.

pub mod api;
pub mod automation;
pub mod backoff;
pub mod error;
pub mod source;
