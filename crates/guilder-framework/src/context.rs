//! The per-dispatch context handed to handlers.
//!
//! One [`Context`] is created for every dispatched event and shared by all
//! matchers that handle it. It carries the event, the [`Session`] the event
//! arrived on, a propagation flag and a small typed state map that handlers
//! of the same matcher can use to pass values along.
//!
//! ```rust,ignore
//! async fn handle(ctx: Arc<Context>) {
//!     println!("event: {}", ctx.kind());
//!     ctx.set_state(42u32);
//!     ctx.stop_propagation(); // later handlers of this matcher are skipped
//! }
//! ```
//!
//! [`Session`]: guilder_core::Session

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use guilder_core::{BoxedSession, Event, EventKind};

/// Context for a single event dispatch.
pub struct Context {
    event: Arc<Event>,
    session: BoxedSession,
    is_propagating: AtomicBool,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Context {
    pub fn new(event: Arc<Event>, session: BoxedSession) -> Self {
        Self {
            event,
            session,
            is_propagating: AtomicBool::new(true),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn event_arc(&self) -> Arc<Event> {
        Arc::clone(&self.event)
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn session(&self) -> &BoxedSession {
        &self.session
    }

    pub fn session_arc(&self) -> BoxedSession {
        Arc::clone(&self.session)
    }

    /// Skips the remaining handlers of the current matcher.
    pub fn stop_propagation(&self) {
        self.is_propagating.store(false, Ordering::SeqCst);
    }

    pub fn is_propagating(&self) -> bool {
        self.is_propagating.load(Ordering::SeqCst)
    }

    /// Stores a value; one value per type, later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("event", &self.event.name())
            .field("is_propagating", &self.is_propagating())
            .finish_non_exhaustive()
    }
}
