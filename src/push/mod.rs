//! Push channel for real-time credit balance updates
//!
//! A WebSocket connection authenticated with the user's token. The server
//! pushes `credits:updated` messages whenever a balance changes; connection
//! state changes are reported as events but never alter the balance.
//!
//! # Fallback Strategy
//!
//! - Initial connection retries 3 times with exponential backoff
//! - If the channel cannot be established or drops, the synchronizer keeps
//!   polling; it does not reconnect until the token changes

mod client;
mod protocol;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use client::WebSocketConnector;
pub use protocol::{CreditsUpdate, ServerMessage};

/// Events delivered by an open push subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    CreditsUpdated(CreditsUpdate),
}

/// Errors that can occur while opening the push channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Failed to establish WebSocket connection
    #[error("Failed to connect to push channel: {0}")]
    ConnectionFailed(String),
    /// Token could not be used as a credential
    #[error("Push channel authentication failed: {0}")]
    AuthenticationFailed(String),
}

/// An open push channel. Dropping it closes the connection.
pub struct PushSubscription {
    events: mpsc::Receiver<PushEvent>,
    cancel: CancellationToken,
}

impl PushSubscription {
    /// Wrap an event stream; `cancel` is triggered when the subscription is dropped.
    pub fn new(events: mpsc::Receiver<PushEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens push subscriptions for a token.
pub trait PushConnector: Send + Sync + 'static {
    fn connect<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<PushSubscription, PushError>>;
}
