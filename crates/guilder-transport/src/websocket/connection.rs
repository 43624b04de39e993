//! Connection lifecycle callbacks and handles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use guilder_core::{TransportError, TransportResult};

// =============================================================================
// Handler
// =============================================================================

/// What the client loop should do after a text frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Keep reading.
    Continue,
    /// Start (or restart) sending pings at the given interval.
    StartHeartbeat(Duration),
}

/// What the client loop should do after the connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect with backoff (subject to the config).
    Reconnect,
    /// Stop the client loop.
    Stop,
}

/// Callbacks driven by the websocket client loop.
///
/// One handler serves every connection the loop opens, so it is the natural
/// place to keep state that must survive reconnects (resume cursors, caches).
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Extra headers for the next handshake.
    async fn request_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// A connection was established.
    async fn on_connect(&self) {}

    /// A text frame arrived.
    async fn on_message(&self, text: &str) -> FrameAction;

    /// A queued text frame is about to be written.
    async fn on_send(&self, _text: &str) {}

    /// A heartbeat pong arrived `latency` after its ping.
    async fn on_pong(&self, _latency: Duration) {}

    /// The connection dropped. `code` is the close code when the peer sent one.
    async fn on_close(&self, code: Option<u16>, reason: &str) -> CloseAction;

    /// A reconnection attempt failed.
    async fn on_connect_error(&self, _error: &TransportError) {}

    /// The client loop exited for good.
    async fn on_shutdown(&self) {}
}

// =============================================================================
// Handle
// =============================================================================

/// A handle to a running client loop.
///
/// Cloning is cheap; all clones control the same loop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    message_tx: mpsc::Sender<String>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    stopped: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        message_tx: mpsc::Sender<String>,
        shutdown_tx: watch::Sender<bool>,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            message_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            stopped,
        }
    }

    /// Queues a text frame for sending.
    pub async fn send(&self, text: String) -> TransportResult<()> {
        self.message_tx
            .send(text)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Asks the loop to close the socket with code 1000 and exit.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Returns `true` once the loop has exited.
    pub fn is_closed(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Waits until the loop has exited.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
