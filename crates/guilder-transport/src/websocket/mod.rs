//! Websocket client transport.

mod client;
mod config;
mod connection;

pub use client::WsClient;
pub use config::WsClientConfig;
pub use connection::{CloseAction, ConnectionHandle, ConnectionHandler, FrameAction};
