/// Locally generated identifier for one tracked job.
pub type JobId = uuid::Uuid;

/// Server-assigned identifier of a stored analysis.
pub type AnalysisId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
