use webaudit_core::error::CoreError;

use crate::api::ApiError;

/// Errors surfaced by job submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// The target failed validation; no request was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The analyzer refused new work (rate limited or overloaded).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The submission request failed in transport or returned an
    /// unusable response.
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl From<CoreError> for TrackerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => Self::InvalidInput(msg),
        }
    }
}

impl From<ApiError> for TrackerError {
    fn from(err: ApiError) -> Self {
        if err.is_unavailable() {
            Self::ServiceUnavailable(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}
