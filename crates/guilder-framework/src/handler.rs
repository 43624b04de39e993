//! Axum-style handlers.
//!
//! [`Handler`] is implemented for async functions taking 0-16 parameters
//! that implement [`FromContext`] and returning a [`HandlerOutput`]: either
//! `()` or `Result<(), E>` with a displayable `E`.
//!
//! ```rust,ignore
//! async fn no_params() {}
//!
//! async fn greet(event: EventContext<MemberEvent>, session: BoxedSession) -> Result<(), ClientError> {
//!     session.create_message("welcome-channel", &format!("Hi {}", event.member.display_name())).await?;
//!     Ok(())
//! }
//! ```
//!
//! An error return is handed to the dispatcher's error handler. If any
//! extractor fails the handler is skipped silently.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;

use crate::context::Context;
use crate::error::{HandlerError, HandlerResult};
use crate::extractor::FromContext;

// ============================================================================
// HandlerOutput
// ============================================================================

/// Return types accepted from handlers.
pub trait HandlerOutput: Send {
    fn into_result(self) -> HandlerResult;
}

impl HandlerOutput for () {
    fn into_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E: Display + Send> HandlerOutput for Result<(), E> {
    fn into_result(self) -> HandlerResult {
        self.map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// An event handler.
///
/// Implemented automatically for suitable async functions; see the module
/// docs.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Calls the handler with the given context.
    async fn call(self, ctx: Arc<Context>) -> HandlerResult;
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn Fn(Arc<Context>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Converts a handler function into a [`BoxedHandler`].
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(move |ctx| f.clone().call(ctx))
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: HandlerOutput + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            #[allow(unused_variables)]
            async fn call(self, ctx: Arc<Context>) -> HandlerResult {
                $(
                    let $ty = match $ty::from_context(&ctx) {
                        Ok(value) => value,
                        Err(e) => {
                            trace!(event = %ctx.kind(), reason = %e, "Extractor failed, skipping handler");
                            return Ok(());
                        }
                    };
                )*

                (self)($($ty,)*).await.into_result()
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15
);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15, T16
);
