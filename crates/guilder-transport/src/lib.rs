//! # guilder transport
//!
//! Network plumbing for the guilder client. Nothing here knows about the
//! gateway protocol; it moves frames and requests and applies the retry rules.
//!
//! ## Features
//!
//! - `ws-client`: persistent websocket client with heartbeat and reconnect
//! - `http-client`: REST client with rate-limit and server-error retries
//! - `full`: both
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  guilder-gateway    │  (frames -> events)
//! ├─────────────────────┤
//! │  guilder-transport  │  <- This crate
//! ├─────────────────────┤
//! │  Network (TLS/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! The websocket side drives a [`ConnectionHandler`](websocket::ConnectionHandler)
//! supplied by the caller:
//!
//! ```rust,ignore
//! use guilder_transport::websocket::{WsClient, WsClientConfig};
//!
//! let config = WsClientConfig::new("wss://api.guilded.gg/v1/websocket");
//! let handle = WsClient::connect(config, handler).await?;
//! handle.stopped().await;
//! ```

#[cfg(feature = "http-client")]
pub mod http;

#[cfg(feature = "ws-client")]
pub mod websocket;

#[cfg(feature = "http-client")]
pub use http::{HttpClient, HttpClientConfig, Route};

#[cfg(feature = "ws-client")]
pub use websocket::{
    CloseAction, ConnectionHandle, ConnectionHandler, FrameAction, WsClient, WsClientConfig,
};
