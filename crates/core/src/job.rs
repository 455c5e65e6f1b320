//! The job model: one submitted analysis request.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::target::normalize_target;
use crate::types::{JobId, Timestamp};

/// Caller-selected options for an audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Capture desktop/mobile screenshots. Makes the audit take longer.
    pub include_screenshots: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            include_screenshots: true,
        }
    }
}

/// A submitted analysis request, alive for one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Normalized absolute URL.
    pub target: String,
    pub options: JobOptions,
    /// Present once submission answered "pending"; never set for cache hits.
    pub session_id: Option<String>,
    /// When the job was submitted. Anchors the poll recency window.
    pub started_at: Timestamp,
}

impl Job {
    /// Validate and normalize `target`, stamping the job with a fresh id.
    pub fn new(target: &str, options: JobOptions) -> Result<Self, CoreError> {
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            target: normalize_target(target)?,
            options,
            session_id: None,
            started_at: chrono::Utc::now(),
        })
    }

    /// Record the session id returned by a pending submission.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
