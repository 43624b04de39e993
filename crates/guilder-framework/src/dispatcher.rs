//! The handler registry.
//!
//! [`Dispatcher`] keeps an explicit map from [`EventKind`] to the matchers
//! registered for it, plus a list of catch-all matchers. For every event:
//!
//! 1. pending one-shot waiters for the kind are resolved when their check
//!    passes;
//! 2. matchers for the kind, then catch-all matchers, are checked in
//!    registration order and each passing matcher is spawned as its own task;
//! 3. a blocking matcher that passes stops the remaining matchers;
//! 4. a handler that fails or panics is reported to the error handler. The
//!    default one logs and carries on.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new();
//! dispatcher.add(on_message().handler(echo_handler));
//! dispatcher.add(Matcher::new().handler(log_everything));
//! dispatcher.on_error(|ctx, err| async move {
//!     eprintln!("{} failed: {err}", ctx.kind());
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, debug, error, span, warn};

use guilder_core::{BoxedSession, ClientError, ClientResult, Event, EventKind};

use crate::context::Context;
use crate::error::HandlerError;
use crate::matcher::Matcher;

/// Receives handler failures.
pub type ErrorHandler =
    Arc<dyn Fn(Arc<Context>, HandlerError) -> BoxFuture<'static, ()> + Send + Sync>;

type WaitCheck = Box<dyn Fn(&Event) -> bool + Send + Sync>;

struct Waiter {
    check: WaitCheck,
    tx: oneshot::Sender<Arc<Event>>,
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(|ctx, err| {
        Box::pin(async move {
            error!(event = %ctx.kind(), error = %err, "Ignoring exception in {}", ctx.kind());
        })
    })
}

struct DispatcherInner {
    by_kind: RwLock<HashMap<EventKind, Vec<Matcher>>>,
    catch_all: RwLock<Vec<Matcher>>,
    waiters: Mutex<HashMap<EventKind, Vec<Waiter>>>,
    error_handler: RwLock<ErrorHandler>,
}

/// Routes events to matchers and waiters.
///
/// Cloning shares the registry; registration works through `&self`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                by_kind: RwLock::new(HashMap::new()),
                catch_all: RwLock::new(Vec::new()),
                waiters: Mutex::new(HashMap::new()),
                error_handler: RwLock::new(default_error_handler()),
            }),
        }
    }

    /// Registers a matcher under each of its kinds, or as a catch-all.
    pub fn add(&self, matcher: Matcher) {
        if matcher.is_catch_all() {
            self.inner.catch_all.write().push(matcher);
            return;
        }

        let mut by_kind = self.inner.by_kind.write();
        for kind in matcher.kinds() {
            by_kind.entry(*kind).or_default().push(matcher.clone());
        }
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(self, matcher: Matcher) -> Self {
        self.add(matcher);
        self
    }

    /// Removes every matcher with the given name. Returns `true` if any was
    /// removed.
    pub fn remove(&self, name: &str) -> bool {
        let named = |m: &Matcher| m.get_name() == Some(name);
        let mut removed = false;

        let mut by_kind = self.inner.by_kind.write();
        for matchers in by_kind.values_mut() {
            let before = matchers.len();
            matchers.retain(|m| !named(m));
            removed |= matchers.len() != before;
        }
        by_kind.retain(|_, matchers| !matchers.is_empty());

        let mut catch_all = self.inner.catch_all.write();
        let before = catch_all.len();
        catch_all.retain(|m| !named(m));
        removed | (catch_all.len() != before)
    }

    /// Number of registrations: a matcher counts once per kind.
    pub fn matcher_count(&self) -> usize {
        let keyed: usize = self.inner.by_kind.read().values().map(Vec::len).sum();
        keyed + self.inner.catch_all.read().len()
    }

    pub fn clear(&self) {
        self.inner.by_kind.write().clear();
        self.inner.catch_all.write().clear();
    }

    /// Replaces the error handler.
    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Context>, HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.inner.error_handler.write() = Arc::new(move |ctx, err| Box::pin(f(ctx, err)));
    }

    /// Restores the logging error handler.
    pub fn reset_error_handler(&self) {
        *self.inner.error_handler.write() = default_error_handler();
    }

    /// Waits for the next event of `kind` passing `check`.
    ///
    /// The waiter is registered when this is called, so an event dispatched
    /// before the returned future is first polled still resolves it. Fails
    /// with [`ClientError::Timeout`] when `timeout` elapses first.
    pub fn wait_for<F>(
        &self,
        kind: EventKind,
        check: F,
        timeout: Option<Duration>,
    ) -> impl Future<Output = ClientResult<Arc<Event>>> + Send + 'static
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().entry(kind).or_default().push(Waiter {
            check: Box::new(check),
            tx,
        });

        async move {
            let received = match timeout {
                Some(limit) => tokio::time::timeout(limit, rx)
                    .await
                    .map_err(|_| ClientError::Timeout(kind.as_str().to_string()))?,
                None => rx.await,
            };
            received.map_err(|_| ClientError::Closed)
        }
    }

    /// Number of waiters still registered, including abandoned ones not yet
    /// pruned.
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.lock().values().map(Vec::len).sum()
    }

    /// Dispatches an event.
    ///
    /// Must be called within a tokio runtime. Returns the handles of the
    /// spawned matcher tasks.
    pub fn dispatch(&self, event: Event, session: BoxedSession) -> Vec<JoinHandle<()>> {
        let kind = event.kind();
        let span = span!(Level::DEBUG, "dispatch", event = %kind);
        let _enter = span.enter();

        let event = Arc::new(event);
        self.resolve_waiters(&event);

        let ctx = Arc::new(Context::new(event, session));
        let mut candidates: Vec<Matcher> = self
            .inner
            .by_kind
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        candidates.extend(self.inner.catch_all.read().iter().cloned());

        let mut tasks = Vec::new();
        for matcher in candidates {
            let matched = catch_unwind(AssertUnwindSafe(|| matcher.matches(&ctx)));
            match matched {
                Ok(true) => {}
                Ok(false) => continue,
                Err(payload) => {
                    self.report(Arc::clone(&ctx), HandlerError::from_panic(payload), &span);
                    continue;
                }
            }

            let blocking = matcher.is_blocking();
            let name = matcher.get_name().unwrap_or("unnamed").to_string();
            tasks.push(self.spawn_matcher(matcher, Arc::clone(&ctx), &span));

            if blocking {
                debug!(matcher = %name, "Blocking matcher matched, stopping dispatch");
                break;
            }
        }

        tasks
    }

    fn spawn_matcher(
        &self,
        matcher: Matcher,
        ctx: Arc<Context>,
        span: &tracing::Span,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            async move {
                if let Err(err) = matcher.run_handlers(Arc::clone(&ctx)).await {
                    let handler = inner.error_handler.read().clone();
                    handler(ctx, err).await;
                }
            }
            .instrument(span.clone()),
        )
    }

    fn report(&self, ctx: Arc<Context>, err: HandlerError, span: &tracing::Span) {
        let handler = self.inner.error_handler.read().clone();
        tokio::spawn(handler(ctx, err).instrument(span.clone()));
    }

    fn resolve_waiters(&self, event: &Arc<Event>) {
        let kind = event.kind();
        let Some(waiters) = self.inner.waiters.lock().remove(&kind) else {
            return;
        };

        let mut remaining = Vec::new();
        for waiter in waiters {
            if waiter.tx.is_closed() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (waiter.check)(event))) {
                Ok(true) => {
                    let _ = waiter.tx.send(Arc::clone(event));
                }
                Ok(false) => remaining.push(waiter),
                // Dropping the sender fails the wait with `Closed`.
                Err(payload) => warn!(
                    error = %HandlerError::from_panic(payload),
                    "wait_for check panicked, discarding waiter"
                ),
            }
        }

        if !remaining.is_empty() {
            self.inner
                .waiters
                .lock()
                .entry(kind)
                .or_default()
                .extend(remaining);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("matcher_count", &self.matcher_count())
            .field("waiter_count", &self.waiter_count())
            .finish()
    }
}
