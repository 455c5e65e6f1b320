//! REST API client for the analyzer's HTTP endpoints.
//!
//! Wraps job submission, the recent-history listing and single-analysis
//! lookup using [`reqwest`]. Each call is one round trip with no retry.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use webaudit_core::types::{AnalysisId, Timestamp};

use crate::transport::{StatusPoller, SubmitEndpoint};

/// Upper bound the history endpoint accepts for `limit`.
pub const MAX_HISTORY_LIMIT: u32 = 50;

/// Default number of recent analyses requested per poll.
pub const DEFAULT_HISTORY_LIMIT: u32 = 10;

/// HTTP client for one analyzer deployment.
pub struct AuditApi {
    client: reqwest::Client,
    api_url: String,
    history_limit: u32,
}

/// Body of `POST /analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    pub url: String,
    pub include_screenshots: bool,
}

/// Body returned when the analyzer accepted a job for background work.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingSubmission {
    pub session_id: String,
    /// Relative push-channel path, e.g. `/ws/{session_id}`.
    #[serde(default)]
    pub websocket_url: Option<String>,
    /// Free-text estimate, e.g. `"30-60 seconds"`.
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What the submission endpoint answered, distinguished by shape.
#[derive(Debug, Clone)]
pub enum SubmitResponse {
    /// A stored result was returned synchronously.
    Cached(serde_json::Value),
    /// The job runs in the background and must be tracked.
    Pending(PendingSubmission),
}

/// One entry of `GET /history`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSummary {
    pub id: AnalysisId,
    /// Target as it was submitted.
    pub url: String,
    #[serde(default)]
    pub overall_score: Option<i64>,
    #[serde(default)]
    pub overall_grade: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub analyzed_at: Timestamp,
    /// Session that produced this analysis, when the analyzer reports it.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Body of `GET /history`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub total_count: Option<i64>,
    #[serde(default)]
    pub recent_analyses: Vec<JobSummary>,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The analyzer returned a non-2xx status code.
    #[error("Analyzer API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body matched no known shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ApiError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Network failures, 5xx, 408 and 429 are transient. Other client
    /// errors and undecodable bodies are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Request(e) => !e.is_decode(),
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::UnexpectedResponse(_) => false,
        }
    }

    /// Whether the analyzer refused new work (rate limit or overload).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == 429 || *status == 503)
    }
}

impl AuditApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Set how many recent analyses each poll requests (clamped to `1..=50`).
    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn history_limit(&self) -> u32 {
        self.history_limit
    }

    /// Submit a target for analysis via `POST /analyze`.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
        let response = self
            .client
            .post(format!("{}/analyze", self.api_url))
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body: serde_json::Value = Self::parse_response(response).await?;
        classify_submit_body(status, body)
    }

    /// List the most recent analyses via `GET /history?limit=N`.
    pub async fn recent_analyses(&self) -> Result<Vec<JobSummary>, ApiError> {
        let response = self
            .client
            .get(format!("{}/history", self.api_url))
            .query(&[("limit", self.history_limit)])
            .send()
            .await?;

        let history: HistoryResponse = Self::parse_response(response).await?;
        Ok(history.recent_analyses)
    }

    /// Retrieve a full analysis via `GET /analysis/{id}`.
    pub async fn get_analysis(&self, id: AnalysisId) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .get(format!("{}/analysis/{}", self.api_url, id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Tell a pending submission from a cache hit by the body's shape.
///
/// A `session_id` means pending. Otherwise a body that looks like a stored
/// analysis (`id` or `url`) is a cache hit. A 202 without a session id is
/// unusable.
pub fn classify_submit_body(
    status: u16,
    body: serde_json::Value,
) -> Result<SubmitResponse, ApiError> {
    if body.get("session_id").is_some_and(|v| v.is_string()) {
        return serde_json::from_value::<PendingSubmission>(body)
            .map(SubmitResponse::Pending)
            .map_err(|e| ApiError::UnexpectedResponse(e.to_string()));
    }
    if status == 202 {
        return Err(ApiError::UnexpectedResponse(
            "accepted response without session_id".into(),
        ));
    }
    if body.get("id").is_some() || body.get("url").is_some() {
        return Ok(SubmitResponse::Cached(body));
    }
    Err(ApiError::UnexpectedResponse(format!(
        "unrecognized submission body: {body}"
    )))
}

/// Accept RFC 3339 timestamps as well as the naive ISO form the analyzer
/// emits for UTC datetimes (`2024-05-01T12:00:00.123456`).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}

#[async_trait]
impl SubmitEndpoint for AuditApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
        AuditApi::submit(self, request).await
    }
}

#[async_trait]
impl StatusPoller for AuditApi {
    async fn poll_once(&self) -> Result<Vec<JobSummary>, ApiError> {
        self.recent_analyses().await
    }

    async fn fetch_result(&self, id: AnalysisId) -> Result<serde_json::Value, ApiError> {
        self.get_analysis(id).await
    }
}
