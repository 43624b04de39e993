//! Parameter injection for handlers.
//!
//! Any type implementing [`FromContext`] can be a handler parameter; the
//! handler is skipped when an extractor fails. [`Option<T>`] never fails.
//!
//! | parameter             | source                                    |
//! |-----------------------|-------------------------------------------|
//! | `EventContext<T>`     | the event's payload, when it carries a `T` |
//! | `Arc<Event>`          | the whole event                           |
//! | `EventKind`           | the event's dispatch name                 |
//! | `BoxedSession`        | the session the event arrived on          |
//! | `SessionRef<S>`       | the session downcast to `S`               |
//! | `State<T>`            | a value stored with `Context::set_state`  |
//! | `Arc<Context>`        | the dispatch context itself               |

mod builtin;
mod session;

pub use builtin::{FromContext, State};
pub use session::SessionRef;
