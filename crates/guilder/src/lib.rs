//! # guilder
//!
//! An async client for the Guilded bot API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  frames  ┌─────────┐  Event  ┌────────────┐  task per matcher
//! │ websocket│─────────▶│ gateway │────────▶│ dispatcher │──────────────────▶ handlers
//! └──────────┘          └─────────┘         └────────────┘
//!      ▲ reconnect + resume cursor                 │ waiters (wait_for)
//!      └────────────── Client ─────────────────────┘
//! ```
//!
//! - **transport**: websocket loop with heartbeat and backoff reconnect, REST
//!   core with rate-limit retries
//! - **gateway**: opcodes, resume cursor, cache-aware event fan-out
//! - **framework**: matchers keyed by [`EventKind`](core::EventKind),
//!   Axum-style handlers, one-shot waiters, periodic task loops
//! - **runtime**: [`Client`](runtime::Client), configuration and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use guilder::prelude::*;
//!
//! async fn ping(client: SessionRef<ClientHandle>, event: EventContext<MessageEvent>) -> ClientResult<()> {
//!     if event.message.text() == "!ping" {
//!         client.create_message(&event.message.channel_id, "pong").await?;
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::builder()
//!         .token(std::env::var("GUILDED_TOKEN")?)
//!         .matcher(on_message().handler(ping))
//!         .build()?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `guilder.toml` configuration files
//! - `yaml-config`: `guilder.yaml` configuration files
//! - `json-log`: JSON log lines

pub use guilder_core as core;
pub use guilder_framework as framework;
pub use guilder_gateway as gateway;
pub use guilder_runtime as runtime;
pub use guilder_transport as transport;

/// Common imports for bots.
///
/// ```rust,ignore
/// use guilder::prelude::*;
/// ```
pub mod prelude {
    // Client and its setup
    pub use guilder_runtime::{
        Client, ClientBuilder, ClientHandle, ConfigLoader, GuilderConfig, LoggingBuilder,
        init_from_config, load_config,
    };

    // Events and payloads
    pub use guilder_core::{
        ChatMessage, ClientError, ClientResult, Event, EventContext, EventKind, MemberEvent,
        MessageEvent, ReactionEvent, ReadyEvent, Session, User,
    };

    // Handler registration
    pub use guilder_framework::{
        Context, Dispatcher, Handler, HandlerError, Loop, Matcher, SessionRef, State, on_connect,
        on_disconnect, on_event, on_kinds, on_message, on_ready,
    };

    pub use guilder_runtime::tracing::{debug, error, info, trace, warn};
}
