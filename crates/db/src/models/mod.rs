//! Row types mapping database tables onto domain records.

pub mod tracked_job;
