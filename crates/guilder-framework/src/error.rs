//! Error types for the guilder framework.

use thiserror::Error;

/// Errors that can occur during context extraction.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The event does not carry the requested payload.
    #[error("event type mismatch: expected '{expected}', got '{got}'")]
    EventTypeMismatch {
        /// Expected payload type name.
        expected: &'static str,
        /// Dispatch name of the actual event.
        got: &'static str,
    },

    /// The session is not of the requested concrete type.
    #[error("session type mismatch: expected '{expected}'")]
    SessionTypeMismatch {
        /// Expected session type name.
        expected: &'static str,
    },

    /// Nothing of the requested type was stored in the dispatch state.
    #[error("no state of type '{0}'")]
    MissingState(&'static str),

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// A failed handler invocation, reported to the error handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("{0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Builds a [`HandlerError::Panicked`] from a panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

/// Result type for handler invocations.
pub type HandlerResult = Result<(), HandlerError>;
