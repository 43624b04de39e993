//! The context object handed to handlers.
//!
//! A [`Session`] replaces a process-wide client singleton: every dispatch
//! carries one, so handlers reach the REST API and connection state through
//! it instead of through globals.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ClientResult;
use crate::model::{ChatMessage, User};

/// Capabilities of a connected client available to handlers.
#[async_trait]
pub trait Session: Any + Send + Sync {
    /// The bot user, known once the gateway has welcomed the client.
    fn user(&self) -> Option<User>;

    /// Time between the last heartbeat ping and its pong.
    fn latency(&self) -> Option<Duration>;

    /// Whether the gateway is connected and welcomed.
    fn is_ready(&self) -> bool;

    /// Posts a message to a channel.
    async fn create_message(&self, channel_id: &str, content: &str) -> ClientResult<ChatMessage>;

    /// Converts the session into `Any` for downcasting.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A type-erased session.
pub type BoxedSession = Arc<dyn Session>;

/// Downcasts a boxed session to a concrete type.
pub fn downcast_session<T: Session>(session: BoxedSession) -> Option<Arc<T>> {
    Arc::downcast::<T>(session.as_any()).ok()
}

// =============================================================================
// ReadyGate
// =============================================================================

/// A resettable readiness flag that tasks can await.
///
/// The gateway sets it on welcome and clears it on disconnect and close.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    /// Creates a gate in the not-ready state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Marks the client ready and wakes all waiters.
    pub fn set_ready(&self) {
        self.tx.send_replace(true);
    }

    /// Marks the client not ready.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Returns the current state.
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the gate is ready; returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
