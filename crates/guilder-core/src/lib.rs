//! # guilder core
//!
//! Types shared by every layer of the guilder client:
//!
//! - [`event`]: the [`Event`] enum, its [`EventKind`] registry key and the
//!   typed payloads handlers extract
//! - [`model`]: minimal typed records for users, messages, members and
//!   reactions
//! - [`session`]: the [`Session`] context object and the [`ReadyGate`]
//! - [`error`]: the HTTP error taxonomy and the top-level [`ClientError`]
//! - [`backoff`]: retry delay schedules
//!
//! Higher layers build on these: `guilder-transport` moves bytes,
//! `guilder-gateway` turns frames into events, `guilder-framework` routes
//! events to handlers and `guilder-runtime` ties everything to a `Client`.

pub mod backoff;
pub mod error;
pub mod event;
pub mod model;
pub mod session;

pub use backoff::{Backoff, ExponentialBackoff};
pub use error::{
    ClientError, ClientResult, HttpError, HttpErrorKind, TransportError, TransportResult,
};
pub use event::{
    BotMembershipEvent, ChannelUpdateEvent, ConnectEvent, DisconnectEvent, ErrorEvent, Event,
    EventContext, EventKind, FromEvent, MemberEvent, MemberUpdateEvent, MessageDeleteEvent,
    MessageEditEvent, MessageEvent, RawMessageDeleteEvent, RawMessageEditEvent, RawSocketEvent,
    ReactionEvent, ReadyEvent, ResourceEvent, ResumedEvent, UnknownEventKind,
};
pub use model::{ChatMessage, Emote, Reaction, Resource, ServerMember, User};
pub use session::{BoxedSession, ReadyGate, Session, downcast_session};

/// Default REST API base URL.
pub const API_BASE_URL: &str = "https://www.guilded.gg/api/v1";

/// Default gateway URL.
pub const GATEWAY_URL: &str = "wss://api.guilded.gg/v1/websocket";

/// User agent sent with every request and handshake.
pub const USER_AGENT: &str = concat!(
    "guilder (https://github.com/guilder-rs/guilder, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
