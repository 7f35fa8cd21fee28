/// Jobs are keyed by time-ordered UUIDs (v7) assigned at creation.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}

/// Identifies one batch submission.
pub type BatchId = uuid::Uuid;

/// Generate a fresh batch identifier.
pub fn new_batch_id() -> BatchId {
    uuid::Uuid::new_v4()
}
