//! WebSocket push-channel adapter.
//!
//! [`WsPushChannel`] holds the analyzer's WebSocket base URL. Each
//! [`open`](PushChannel::open) spawns a reader task that connects to
//! `{ws_url}/ws/{session_id}`, parses text frames into progress events
//! and forwards them through a [`ChannelHandle`]. Dropping the handle
//! closes the socket.

use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::messages::parse_message;
use crate::transport::{ChannelError, ChannelFeed, ChannelHandle, ChannelSignal, PushChannel};

/// Push-channel adapter for one analyzer deployment.
pub struct WsPushChannel {
    ws_url: String,
}

impl WsPushChannel {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Endpoint for one session.
    pub fn session_url(&self, session_id: &str) -> String {
        format!("{}/ws/{}", self.ws_url, session_id)
    }
}

impl PushChannel for WsPushChannel {
    fn open(&self, session_id: &str) -> ChannelHandle {
        let (handle, feed) = ChannelHandle::pair(session_id);
        let url = self.session_url(session_id);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            run_channel(&url, &session_id, feed).await;
            tracing::debug!(session_id = %session_id, "Push channel task exited");
        });
        handle
    }
}

/// Connect, then forward frames until the socket ends or the consumer
/// releases the handle.
async fn run_channel(url: &str, session_id: &str, feed: ChannelFeed) {
    let connected = tokio::select! {
        biased;
        _ = feed.closed() => return,
        result = connect_async(url) => result,
    };

    let mut ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "Failed to open push channel");
            feed.send(ChannelSignal::Error(ChannelError::Connection(format!(
                "Failed to connect to {url}: {e}"
            ))))
            .await;
            return;
        }
    };

    tracing::info!(session_id, "Push channel opened");
    if !feed.send(ChannelSignal::Opened).await {
        return;
    }

    loop {
        let frame = tokio::select! {
            biased;
            _ = feed.closed() => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(session_id, error = %e, "Error closing push channel");
                }
                return;
            }
            frame = ws_stream.next() => frame,
        };

        let signal = match frame {
            Some(Ok(Message::Text(text))) => match parse_message(&text) {
                Ok(event) => ChannelSignal::Message(event),
                Err(e) => {
                    tracing::warn!(
                        session_id,
                        error = %e,
                        raw_message = %text,
                        "Failed to parse progress message",
                    );
                    ChannelSignal::Malformed(e.to_string())
                }
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(session_id, "Ignoring binary frame");
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                // Handled automatically by tungstenite.
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(session_id, ?frame, "Push channel closed by peer");
                ChannelSignal::Closed {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                }
            }
            Some(Err(e)) => {
                tracing::warn!(session_id, error = %e, "Push channel receive error");
                ChannelSignal::Error(ChannelError::Protocol(e.to_string()))
            }
            None => ChannelSignal::Closed {
                code: None,
                reason: "stream ended".into(),
            },
        };

        let ends = signal.ends_channel();
        if !feed.send(signal).await || ends {
            return;
        }
    }
}
