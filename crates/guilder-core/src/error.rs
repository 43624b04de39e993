//! Error types shared across guilder crates.
//!
//! HTTP outcomes form a flat taxonomy ([`HttpErrorKind`]) carried by a single
//! [`HttpError`] value. Gateway and socket failures are [`TransportError`]s,
//! and [`ClientError`] is the top-level error surfaced to users.
//! Framework-level errors (like `ExtractError`) live in `guilder-framework`.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

// =============================================================================
// HTTP Errors
// =============================================================================

/// Classification of a failed HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    /// 400
    BadRequest,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 429
    TooManyRequests,
    /// Any status >= 500.
    ServerError,
    /// Any other non-success status.
    Other,
}

impl HttpErrorKind {
    /// Maps a status code to its kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            429 => Self::TooManyRequests,
            s if s >= 500 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadRequest => "bad request",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::TooManyRequests => "too many requests",
            Self::ServerError => "server error",
            Self::Other => "http error",
        };
        f.write_str(name)
    }
}

/// A non-success response from the REST API.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}): {message} ({code})")]
pub struct HttpError {
    /// Classification derived from `status`.
    pub kind: HttpErrorKind,
    /// The HTTP status code.
    pub status: u16,
    /// Machine-readable error code, `"UnknownCode"` when the body carried none.
    pub code: String,
    /// Human-readable message from the body.
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl HttpError {
    /// Builds an error from a status code and the raw response body.
    ///
    /// The body is expected to be `{"message": ..., "code": ...}`; anything
    /// else is kept verbatim as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let (message, code) = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => (
                parsed.message.unwrap_or_default(),
                parsed.code.unwrap_or_else(|| "UnknownCode".to_string()),
            ),
            Err(_) => (body.to_string(), "UnknownCode".to_string()),
        };

        Self {
            kind: HttpErrorKind::from_status(status),
            status,
            code,
            message,
        }
    }

    /// Returns `true` for rate-limit responses.
    pub fn is_rate_limited(&self) -> bool {
        self.kind == HttpErrorKind::TooManyRequests
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by the socket and HTTP transports.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed by the remote end.
    #[error("connection closed ({code:?}): {reason}")]
    ConnectionClosed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Reason for closure.
        reason: String,
    },

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Message send failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Client Errors
// =============================================================================

/// Top-level error type of the client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The REST API returned a failure.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The gateway or HTTP transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `start` was called without a token.
    #[error("a token is required to start the client")]
    MissingToken,

    /// Email/password login is not accepted by the bot API.
    #[error("email/password login is not supported by the bot API; use a bot token")]
    UnsupportedLogin,

    /// The client or task is already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// The client has been closed.
    #[error("the client is closed")]
    Closed,

    /// A payload did not have the expected shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Waiting for an event or response exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl ClientError {
    /// Creates an invalid-data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns the HTTP error kind when this is an HTTP failure.
    pub fn http_kind(&self) -> Option<HttpErrorKind> {
        match self {
            Self::Http(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
