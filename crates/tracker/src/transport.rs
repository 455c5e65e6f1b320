//! Transport seams consumed by the coordinator.
//!
//! Three thin adapters sit between the coordinator and the analyzer:
//! [`SubmitEndpoint`] for the one submission call, [`PushChannel`] for the
//! WebSocket progress stream, and [`StatusPoller`] for the polling
//! fallback. Production implementations live in [`crate::api`] and
//! [`crate::client`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use webaudit_core::progress::ProgressEvent;
use webaudit_core::types::AnalysisId;

use crate::api::{ApiError, JobSummary, SubmitRequest, SubmitResponse};

/// Buffered signals per channel handle.
pub const CHANNEL_BUFFER: usize = 64;

/// Issues the submission request.
#[async_trait]
pub trait SubmitEndpoint: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError>;
}

/// Single round-trip status requests for the polling fallback.
#[async_trait]
pub trait StatusPoller: Send + Sync {
    /// Fetch the most recent completed-job summaries.
    async fn poll_once(&self) -> Result<Vec<JobSummary>, ApiError>;

    /// Resolve a summary id to the full result payload.
    async fn fetch_result(&self, id: AnalysisId) -> Result<serde_json::Value, ApiError>;
}

/// Opens push channels keyed by session id.
///
/// `open` must not block: the connection is established in the
/// background and reported through the returned handle as
/// [`ChannelSignal::Opened`] or [`ChannelSignal::Error`].
pub trait PushChannel: Send + Sync {
    fn open(&self, session_id: &str) -> ChannelHandle;
}

/// Lifecycle and data notifications from one push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The connection is established.
    Opened,
    /// A well-formed progress frame.
    Message(ProgressEvent),
    /// A frame that could not be decoded. The channel stays usable.
    Malformed(String),
    /// The connection failed or broke.
    Error(ChannelError),
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
}

impl ChannelSignal {
    /// Whether no further signals follow this one.
    pub fn ends_channel(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Closed { .. })
    }
}

/// Errors that can occur on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Consumer side of one push channel, owned by exactly one coordinator.
///
/// Closing or dropping the handle tells the producer to tear the
/// connection down.
#[derive(Debug)]
pub struct ChannelHandle {
    session_id: String,
    signals: mpsc::Receiver<ChannelSignal>,
    cancel: CancellationToken,
}

/// Producer side of one push channel, held by the adapter.
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    signals: mpsc::Sender<ChannelSignal>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Create a connected handle/feed pair.
    pub fn pair(session_id: impl Into<String>) -> (ChannelHandle, ChannelFeed) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let cancel = CancellationToken::new();
        let handle = ChannelHandle {
            session_id: session_id.into(),
            signals: rx,
            cancel: cancel.clone(),
        };
        let feed = ChannelFeed {
            signals: tx,
            cancel,
        };
        (handle, feed)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next signal. `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<ChannelSignal> {
        self.signals.recv().await
    }

    /// Release the channel.
    pub fn close(self) {
        tracing::debug!(session_id = %self.session_id, "Closing push channel");
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ChannelFeed {
    /// Deliver a signal. Returns `false` once the consumer has released
    /// the channel.
    pub async fn send(&self, signal: ChannelSignal) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.signals.send(signal).await.is_ok()
    }

    /// Resolves when the consumer closes the channel.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
