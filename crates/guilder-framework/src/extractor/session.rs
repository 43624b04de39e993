use std::sync::Arc;

use crate::context::Context;
use crate::error::{ExtractError, ExtractResult};
use crate::extractor::FromContext;
use guilder_core::{Session, downcast_session};

/// The session downcast to its concrete type.
///
/// Gives handlers access to APIs beyond the [`Session`] trait:
///
/// ```rust,ignore
/// async fn handler(client: SessionRef<ClientHandle>, event: EventContext<MessageEvent>) {
///     let http = client.http();
/// }
/// ```
#[derive(Clone)]
pub struct SessionRef<S: Session>(pub Arc<S>);

impl<S: Session> std::ops::Deref for SessionRef<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: Session> std::fmt::Debug for SessionRef<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionRef")
            .field(&std::any::type_name::<S>())
            .finish()
    }
}

impl<S: Session> FromContext for SessionRef<S> {
    fn from_context(ctx: &Arc<Context>) -> ExtractResult<Self> {
        downcast_session::<S>(ctx.session_arc())
            .map(SessionRef)
            .ok_or(ExtractError::SessionTypeMismatch {
                expected: std::any::type_name::<S>(),
            })
    }
}
