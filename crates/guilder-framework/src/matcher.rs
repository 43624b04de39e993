//! Matchers group handlers behind a common rule.
//!
//! A [`Matcher`] is registered under the event kinds it listens to (or none,
//! for a catch-all). When one of its kinds is dispatched the optional check
//! runs, and if it passes the handlers execute in order inside a single task.
//!
//! ```rust,ignore
//! let matcher = Matcher::new()
//!     .on(EventKind::Message)
//!     .check(|ctx| ctx.session().user().is_some())
//!     .name("echo")
//!     .handler(echo_handler)
//!     .handler(log_handler);
//! ```
//!
//! # Tower Service Integration
//!
//! `Matcher` implements `tower::Service<Arc<Context>>`, so tower middleware
//! can wrap it directly:
//!
//! ```rust,ignore
//! let service = ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .service(matcher);
//! ```

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::FutureExt;
use tower::Service;
use tracing::{debug, trace};

use guilder_core::EventKind;

use crate::context::Context;
use crate::error::{HandlerError, HandlerResult};
use crate::handler::{BoxedHandler, Handler, into_handler};

/// A type-erased check function.
pub type CheckFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Clone)]
struct MatcherInner {
    kinds: Vec<EventKind>,
    check_fn: Option<CheckFn>,
    handlers: Vec<BoxedHandler>,
    block: bool,
    name: Option<String>,
}

/// A named group of handlers with a shared check.
///
/// Cloning is cheap; builder methods copy on write.
#[derive(Clone)]
pub struct Matcher {
    inner: Arc<MatcherInner>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    /// An empty matcher. Without kinds it receives every event.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MatcherInner {
                kinds: Vec::new(),
                check_fn: None,
                handlers: Vec::new(),
                block: false,
                name: None,
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut MatcherInner {
        Arc::make_mut(&mut self.inner)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner_mut().name = Some(name.into());
        self
    }

    /// Adds an event kind to listen to.
    pub fn on(mut self, kind: EventKind) -> Self {
        let inner = self.inner_mut();
        if !inner.kinds.contains(&kind) {
            inner.kinds.push(kind);
        }
        self
    }

    /// Sets a custom check, evaluated after the kind filter.
    pub fn check<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.inner_mut().check_fn = Some(Arc::new(f));
        self
    }

    /// When set, a matching matcher stops later matchers for the same event.
    pub fn block(mut self, block: bool) -> Self {
        self.inner_mut().block = block;
        self
    }

    /// Appends a handler. Handlers run in insertion order.
    pub fn handler<F, T>(mut self, f: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        self.inner_mut().handlers.push(into_handler(f));
        self
    }

    pub fn handler_boxed(mut self, handler: BoxedHandler) -> Self {
        self.inner_mut().handlers.push(handler);
        self
    }

    /// The kinds this matcher is registered under; empty for a catch-all.
    pub fn kinds(&self) -> &[EventKind] {
        &self.inner.kinds
    }

    pub fn is_catch_all(&self) -> bool {
        self.inner.kinds.is_empty()
    }

    pub fn matches(&self, ctx: &Context) -> bool {
        if !self.is_catch_all() && !self.inner.kinds.contains(&ctx.kind()) {
            return false;
        }
        match &self.inner.check_fn {
            Some(f) => f(ctx),
            None => true,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.inner.block
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    pub fn get_name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    fn display_name(&self) -> &str {
        self.inner.name.as_deref().unwrap_or("unnamed")
    }

    /// Runs the handlers in order without evaluating the check.
    ///
    /// Stops at the first error or panic, or when a handler stops
    /// propagation.
    pub async fn run_handlers(&self, ctx: Arc<Context>) -> HandlerResult {
        debug!(
            matcher = self.display_name(),
            handler_count = self.inner.handlers.len(),
            "Executing handlers"
        );

        for (i, handler) in self.inner.handlers.iter().enumerate() {
            if !ctx.is_propagating() {
                trace!(matcher = self.display_name(), handler_index = i, "Propagation stopped");
                break;
            }

            trace!(matcher = self.display_name(), handler_index = i, "Executing handler");
            AssertUnwindSafe(handler(Arc::clone(&ctx)))
                .catch_unwind()
                .await
                .map_err(HandlerError::from_panic)??;
        }

        Ok(())
    }

    /// Evaluates the check and runs the handlers when it passes.
    ///
    /// Returns `Ok(false)` when the check failed.
    pub async fn execute(&self, ctx: Arc<Context>) -> Result<bool, HandlerError> {
        if !self.matches(&ctx) {
            trace!(matcher = self.display_name(), "Matcher check failed, skipping");
            return Ok(false);
        }
        self.run_handlers(ctx).await?;
        Ok(true)
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("name", &self.inner.name)
            .field("kinds", &self.inner.kinds)
            .field("handler_count", &self.inner.handlers.len())
            .field("block", &self.inner.block)
            .finish()
    }
}

// ============================================================================
// Tower Service Implementation for Matcher
// ============================================================================

/// Response of [`Matcher`] used as a tower service.
#[derive(Debug, Clone)]
pub struct MatcherResponse {
    pub matched: bool,
    pub blocking: bool,
    /// The failure of the first failing handler, if any.
    pub error: Option<HandlerError>,
}

impl MatcherResponse {
    pub fn should_stop(&self) -> bool {
        self.matched && self.blocking
    }
}

impl Service<Arc<Context>> for Matcher {
    type Response = MatcherResponse;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<Context>) -> Self::Future {
        let matcher = self.clone();

        Box::pin(async move {
            let (matched, error) = match matcher.execute(ctx).await {
                Ok(matched) => (matched, None),
                Err(e) => (true, Some(e)),
            };
            Ok(MatcherResponse {
                matched,
                blocking: matcher.is_blocking(),
                error,
            })
        })
    }
}
