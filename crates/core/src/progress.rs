//! Normalized progress events and the caller-visible display snapshot.
//!
//! Both transports (push channel and status polling) produce
//! [`ProgressEvent`]s. The coordinator folds them into a
//! [`DisplayProgress`], which guarantees the reported percent stays in
//! `[0, 100]` and never moves backwards.

use serde::Serialize;

use crate::types::AnalysisId;

/// Upper bound of the displayed percentage.
pub const MAX_PERCENT: u8 = 100;

/// What, if anything, an event concludes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Plain progress update.
    None,
    /// The job finished; carries the full result payload.
    Result(serde_json::Value),
    /// The job failed remotely; carries the reason.
    Failure(String),
}

/// A transport-independent progress notification.
///
/// `percent` is kept exactly as the transport reported it. Clamping is a
/// display concern handled by [`DisplayProgress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: i64,
    pub message: Option<String>,
    pub outcome: EventOutcome,
    /// Stored analysis id, when the collaborator reports one with a result.
    pub analysis_id: Option<AnalysisId>,
}

impl ProgressEvent {
    /// A non-terminal update.
    pub fn new(stage: impl Into<String>, percent: i64) -> Self {
        Self {
            stage: stage.into(),
            percent,
            message: None,
            outcome: EventOutcome::None,
            analysis_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, payload: serde_json::Value) -> Self {
        self.outcome = EventOutcome::Result(payload);
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.outcome = EventOutcome::Failure(reason.into());
        self
    }

    pub fn with_analysis_id(mut self, id: AnalysisId) -> Self {
        self.analysis_id = Some(id);
        self
    }

    /// Whether this event concludes the job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.outcome, EventOutcome::None)
    }
}

/// What the caller sees while a job is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    /// Always within `[0, 100]`.
    pub percent: u8,
    pub message: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            stage: "Waiting for progress".into(),
            percent: 0,
            message: None,
        }
    }
}

/// Clamp a transport-supplied percentage into `[0, 100]`.
pub fn clamp_percent(raw: i64) -> u8 {
    raw.clamp(0, i64::from(MAX_PERCENT)) as u8
}

/// Running display state for one job.
#[derive(Debug, Clone, Default)]
pub struct DisplayProgress {
    snapshot: ProgressSnapshot,
}

impl DisplayProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Fold an update into the display.
    ///
    /// Stage and message always follow the latest update; the percent only
    /// moves forward.
    pub fn update(
        &mut self,
        stage: impl Into<String>,
        raw_percent: i64,
        message: Option<String>,
    ) -> &ProgressSnapshot {
        self.snapshot.stage = stage.into();
        self.snapshot.message = message;
        self.raise(clamp_percent(raw_percent));
        &self.snapshot
    }

    /// Raise the percent without touching stage or message.
    pub fn raise(&mut self, percent: u8) {
        self.snapshot.percent = self.snapshot.percent.max(percent.min(MAX_PERCENT));
    }
}
