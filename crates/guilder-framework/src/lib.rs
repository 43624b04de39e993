//! # guilder framework
//!
//! Routes gateway events to user code:
//!
//! - [`Context`]: one per dispatched event, shared by every matcher
//! - [`FromContext`] extractors for Axum-style [`Handler`] parameters
//! - [`Matcher`]: a check plus an ordered list of handlers
//! - [`Dispatcher`]: the handler registry keyed by [`EventKind`], one-shot
//!   waiters and the error handler
//! - [`tasks::Loop`]: periodic background tasks
//!
//! [`EventKind`]: guilder_core::EventKind

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod matcher;
pub mod matcher_builders;
pub mod tasks;

pub use context::Context;
pub use dispatcher::{Dispatcher, ErrorHandler};
pub use error::{ExtractError, ExtractResult, HandlerError, HandlerResult};
pub use extractor::{FromContext, SessionRef, State};
pub use handler::{BoxedHandler, Handler, HandlerOutput, into_handler};
pub use matcher::{CheckFn, Matcher, MatcherResponse};
pub use matcher_builders::{on_connect, on_disconnect, on_event, on_kinds, on_message, on_ready};
pub use tasks::{BoxError, ErrorPredicate, Loop, LoopBuilder};
