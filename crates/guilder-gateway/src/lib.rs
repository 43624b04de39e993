//! # guilder gateway
//!
//! The Guilded gateway protocol on top of `guilder-transport`'s websocket
//! client.
//!
//! - [`frame`]: the `{op, d, s, t}` frame and its opcodes
//! - [`parser`]: wire event names and the cache-aware fan-out into
//!   [`Event`](guilder_core::Event)s
//! - [`cache`]: message, member and channel caches filled from events
//! - [`session`]: [`GatewaySession`], the
//!   [`ConnectionHandler`](guilder_transport::websocket::ConnectionHandler)
//!   that tracks the resume cursor and readiness
//!
//! ```rust,ignore
//! use guilder_gateway::{GatewayConfig, GatewaySession};
//! use guilder_transport::websocket::WsClientConfig;
//!
//! let sink = Arc::new(|event| println!("{}", event.name()));
//! let session = Arc::new(GatewaySession::new(GatewayConfig::new(token), ReadyGate::new(), sink));
//! let handle = session.connect(WsClientConfig::new(guilder_core::GATEWAY_URL)).await?;
//! ```

pub mod cache;
pub mod frame;
pub mod parser;
pub mod session;

pub use cache::{DEFAULT_MAX_MESSAGES, GatewayCache, MessageCache};
pub use frame::{GatewayFrame, Opcode, Welcome};
pub use parser::{WireEvent, parse_dispatch};
pub use session::{EventSink, GatewayConfig, GatewaySession, RESUME_HEADER};
