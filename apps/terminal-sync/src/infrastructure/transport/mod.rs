//! WebSocket Terminal Transport
//!
//! Implements the [`TerminalTransport`] port over a WebSocket
//! connection. Events and commands are exchanged as JSON text frames
//! using the crate's canonical event model; the remote side speaks the
//! same encoding through a vendor-side gateway.
//!
//! One established session runs two pump tasks: a writer draining the
//! command channel into the socket, and a reader parsing frames into
//! envelopes. The reader closing its channel is how session death
//! reaches the stream supervisor; malformed frames are logged and
//! skipped rather than killing the session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::application::ports::{ResumePoint, TerminalTransport, TransportError, TransportSession};
use crate::domain::account::AccountId;
use crate::domain::events::{EventEnvelope, StreamCommand};

/// Capacity of the per-session event and command channels.
const SESSION_CHANNEL_CAPACITY: usize = 1024;

/// WebSocket adapter for the terminal synchronization transport.
pub struct WebSocketTransport {
    base_url: String,
    token: String,
}

impl WebSocketTransport {
    /// Create a transport against a WebSocket base URL.
    ///
    /// `base_url` is the scheme and host part, e.g.
    /// `wss://stream.meridian.dev`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn session_url(&self, account: &AccountId, resume: Option<ResumePoint>) -> String {
        let base = self.base_url.trim_end_matches('/');
        resume.map_or_else(
            || format!("{base}/accounts/{account}/stream"),
            |point| {
                format!(
                    "{base}/accounts/{account}/stream?instance={}&sequence={}",
                    point.instance, point.sequence
                )
            },
        )
    }
}

#[async_trait]
impl TerminalTransport for WebSocketTransport {
    async fn connect(
        &self,
        account: &AccountId,
        resume: Option<ResumePoint>,
    ) -> Result<TransportSession, TransportError> {
        let url = self.session_url(account, resume);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let token = self
            .token
            .parse()
            .map_err(|_| TransportError::ConnectFailed("token is not header-safe".to_string()))?;
        request.headers_mut().insert("auth-token", token);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = socket.split();

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<StreamCommand>(SESSION_CHANNEL_CAPACITY);
        let (evt_tx, evt_rx) = mpsc::channel::<EventEnvelope>(SESSION_CHANNEL_CAPACITY);
        let (pong_tx, mut pong_rx) = mpsc::channel::<Vec<u8>>(8);

        // Writer: commands and pong replies into the socket.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = cmd_rx.recv() => {
                        let Some(command) = command else { break };
                        let frame = match codec::encode_command(&command) {
                            Ok(frame) => frame,
                            Err(error) => {
                                tracing::error!(error = %error, "Failed to encode command");
                                continue;
                            }
                        };
                        if write.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    pong = pong_rx.recv() => {
                        let Some(data) = pong else { break };
                        if write.send(Message::Pong(data.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        // Reader: frames into envelopes until the socket dies.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match codec::decode_envelope(&text) {
                        Ok(envelope) => {
                            if evt_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "Skipping malformed frame");
                        }
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = pong_tx.send(data.into()).await;
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the terminal session");
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(error = %error, "Terminal socket error");
                        break;
                    }
                }
            }
            // Dropping evt_tx closes the event channel, which the
            // stream supervisor treats as a disconnect.
        });

        Ok(TransportSession {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

/// JSON codec for the canonical event/command model.
pub mod codec {
    use crate::domain::events::{EventEnvelope, StreamCommand};

    /// Decode one text frame into an event envelope.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the frame does not match
    /// the canonical model.
    pub fn decode_envelope(frame: &str) -> Result<EventEnvelope, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Encode one outbound command as a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when serialization fails.
    pub fn encode_command(command: &StreamCommand) -> Result<String, serde_json::Error> {
        serde_json::to_string(command)
    }
}
