//! Caller-visible job events.
//!
//! A coordinator emits these in order over one channel per job. The
//! stream always ends with exactly one terminal event: `Completed`,
//! `Failed`, or `Cancelled`. Which transport produced an update is never
//! exposed.

use serde::Serialize;
use webaudit_core::progress::ProgressSnapshot;
use webaudit_core::types::AnalysisId;

use crate::error::TrackerError;

/// Externally visible coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Submitting,
    AwaitingChannel,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The analyzer reported the job as failed.
    #[error("analysis failed: {0}")]
    Remote(String),

    /// The poll budget ran out without a result.
    #[error("timed out waiting for the analysis result")]
    Timeout,

    /// The analyzer refused the submission.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The submission request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// A status request failed in a way retrying cannot fix.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<TrackerError> for FailureReason {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::ServiceUnavailable(msg) => Self::ServiceUnavailable(msg),
            TrackerError::RequestFailed(msg) | TrackerError::InvalidInput(msg) => {
                Self::RequestFailed(msg)
            }
        }
    }
}

/// One entry in a job's outbound event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// The submission request is in flight.
    Submitting,

    /// The analyzer accepted the job; waiting for the push channel.
    AwaitingChannel { session_id: String },

    /// The job is running. Carries the current display state.
    Active(ProgressSnapshot),

    /// The job finished.
    Completed {
        /// Full result payload.
        result: serde_json::Value,
        /// Served synchronously from the analyzer's cache.
        cached: bool,
        analysis_id: Option<AnalysisId>,
    },

    /// The job failed.
    Failed { reason: FailureReason },

    /// The caller stopped observing the job. The remote analysis may
    /// still be running.
    Cancelled,
}

impl JobEvent {
    /// The state the coordinator is in after emitting this event.
    pub fn state(&self) -> JobState {
        match self {
            Self::Submitting => JobState::Submitting,
            Self::AwaitingChannel { .. } => JobState::AwaitingChannel,
            Self::Active(_) => JobState::Active,
            Self::Completed { .. } => JobState::Completed,
            Self::Failed { .. } => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}
