use std::ops::Deref;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ExtractError, ExtractResult};
use guilder_core::{BoxedSession, Event, EventContext, EventKind, FromEvent};

/// A type that can be extracted from a [`Context`].
pub trait FromContext: Sized {
    /// Attempts the extraction; an `Err` skips the handler.
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self>;
}

impl<T: FromEvent> FromContext for EventContext<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        EventContext::extract(ctx.event()).ok_or_else(|| ExtractError::EventTypeMismatch {
            expected: std::any::type_name::<T>(),
            got: ctx.kind().as_str(),
        })
    }
}

impl FromContext for Arc<Event> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(ctx.event_arc())
    }
}

impl FromContext for EventKind {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(ctx.kind())
    }
}

impl FromContext for BoxedSession {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(ctx.session_arc())
    }
}

impl FromContext for Arc<Context> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

/// A clone of a value stored in the dispatch state.
#[derive(Debug, Clone)]
pub struct State<T>(pub T);

impl<T> Deref for State<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Clone + Send + Sync + 'static> FromContext for State<T> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        ctx.get_state::<T>()
            .map(State)
            .ok_or(ExtractError::MissingState(std::any::type_name::<T>()))
    }
}
