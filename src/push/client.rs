//! WebSocket push channel client
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket with `Authorization: Bearer <token>`
//! 2. Background task forwards `credits:updated` messages as `PushEvent`s
//! 3. Dropping the `PushSubscription` sends a close frame and ends the task
//!
//! # Retry Strategy
//!
//! Initial connection retries 3 times with exponential backoff (1s, 2s).
//! Mid-session disconnects do NOT reconnect.

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use super::protocol::ServerMessage;
use super::{PushConnector, PushError, PushEvent, PushSubscription};

/// Connection timeout for initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retry attempts for initial connection
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Buffered events per subscription
const EVENT_BUFFER: usize = 32;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the push server over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect with retries.
    pub async fn open(&self, token: &str) -> Result<PushSubscription, PushError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                log::info!(
                    "Push: retrying connection in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
            }

            match self.try_connect(token).await {
                Ok(socket) => return Ok(spawn_receiver(socket)),
                // A malformed credential will not get better on retry
                Err(e @ PushError::AuthenticationFailed(_)) => return Err(e),
                Err(e) => {
                    log::warn!("Push: connection attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PushError::ConnectionFailed("Max retries exceeded".to_string())))
    }

    /// Single connection attempt (no retries)
    async fn try_connect(&self, token: &str) -> Result<Socket, PushError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| PushError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| PushError::AuthenticationFailed(e.to_string()))?,
        );

        log::info!("Push: connecting to {}", self.url);

        let (socket, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| PushError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| PushError::ConnectionFailed(e.to_string()))?;

        log::info!("Push: connected");
        Ok(socket)
    }
}

impl PushConnector for WebSocketConnector {
    fn connect<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<PushSubscription, PushError>> {
        Box::pin(self.open(token))
    }
}

/// Spawn the task that reads the socket and forwards events.
fn spawn_receiver(mut socket: Socket) -> PushSubscription {
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        if events_tx.send(PushEvent::Connected).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                biased;

                _ = task_cancel.cancelled() => {
                    log::info!("Push: closing connection");
                    if let Err(e) = socket.close(None).await {
                        log::debug!("Push: error closing WebSocket: {}", e);
                    }
                    return;
                }

                msg = socket.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(ServerMessage::CreditsUpdated(update)) => {
                                    if events_tx.send(PushEvent::CreditsUpdated(update)).await.is_err() {
                                        log::debug!("Push: subscriber gone");
                                        return;
                                    }
                                }
                                Ok(ServerMessage::Unknown) => {
                                    log::debug!("Push: ignoring unhandled message");
                                }
                                Err(e) => {
                                    log::warn!("Push: failed to parse message: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Push: WebSocket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            log::warn!("Push: WebSocket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {} // Ignore ping/pong/binary
                    }
                }
            }
        }

        let _ = events_tx.send(PushEvent::Disconnected).await;
        log::debug!("Push: receiver task exiting");
    });

    PushSubscription::new(events_rx, cancel)
}
