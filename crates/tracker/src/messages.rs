//! Push-channel message types and parser.
//!
//! The analyzer sends JSON text frames shaped like
//! `{"stage": "...", "progress": 10, "message": "...", "error": ..., "results": {...}}`.
//! A frame carrying `results` or a truthy `error` is terminal. This module
//! turns a frame into a normalized [`ProgressEvent`].

use serde::Deserialize;
use webaudit_core::progress::ProgressEvent;
use webaudit_core::types::AnalysisId;

/// Raw progress frame as sent by the analyzer.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessage {
    /// Human-readable milestone, e.g. `"Testing website speed..."`.
    pub stage: String,
    /// Reported percentage. Not guaranteed to be in range or monotonic.
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    /// `true`, a reason string, or an object with a `message` field.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    /// Full result payload; present only on the final frame.
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    /// Id of the stored analysis, sent alongside `results`.
    #[serde(default)]
    pub analysis_id: Option<AnalysisId>,
}

impl ChannelMessage {
    /// Normalize into a [`ProgressEvent`].
    ///
    /// An error marker takes precedence over a result payload.
    pub fn into_event(self) -> ProgressEvent {
        let percent = self.progress.round() as i64;
        let failure = self
            .error
            .as_ref()
            .and_then(|error| failure_reason(error, self.message.as_deref(), &self.stage));

        let mut event = ProgressEvent::new(self.stage, percent);
        event.message = self.message;
        event.analysis_id = self.analysis_id;

        match (failure, self.results) {
            (Some(reason), _) => event.with_failure(reason),
            (None, Some(results)) if !results.is_null() => event.with_result(results),
            _ => event,
        }
    }
}

/// Interpret the `error` field, returning a reason when it marks failure.
fn failure_reason(error: &serde_json::Value, message: Option<&str>, stage: &str) -> Option<String> {
    let fallback = || message.unwrap_or(stage).to_string();
    match error {
        serde_json::Value::Null | serde_json::Value::Bool(false) => None,
        serde_json::Value::Bool(true) => Some(fallback()),
        serde_json::Value::String(reason) if reason.is_empty() => Some(fallback()),
        serde_json::Value::String(reason) => Some(reason.clone()),
        serde_json::Value::Object(map) => Some(
            map.get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(fallback),
        ),
        other => Some(other.to_string()),
    }
}

/// Parse a push-channel text frame into a normalized event.
///
/// Returns `Err` for malformed JSON or frames missing `stage`/`progress`.
/// Callers should log the error and keep listening.
pub fn parse_message(text: &str) -> Result<ProgressEvent, serde_json::Error> {
    serde_json::from_str::<ChannelMessage>(text).map(ChannelMessage::into_event)
}
