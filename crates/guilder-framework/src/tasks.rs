//! Background task loops.
//!
//! A [`Loop`] runs an async body at a fixed interval on its own tokio task,
//! with hooks around the run and retry handling for transient errors.
//!
//! ```rust,ignore
//! let heartbeat = Loop::builder()
//!     .name("status")
//!     .minutes(5.0)
//!     .wait_until_ready(client.ready_gate())
//!     .build(move || {
//!         let session = session.clone();
//!         async move {
//!             session.create_message(STATUS_CHANNEL, "still alive").await?;
//!             Ok::<(), ClientError>(())
//!         }
//!     })?;
//!
//! heartbeat.start()?;
//! ```
//!
//! # Iteration schedule
//!
//! Iterations are spaced by the interval measured from the start of the
//! previous one. If an iteration overruns, the next one starts immediately.
//! When the body fails with an error accepted by the handled-error predicates
//! and `reconnect` is enabled, the same iteration is retried after an
//! [`ExponentialBackoff`] delay. Any other error ends the run, marks the loop
//! failed and is passed to the error hook.
//!
//! `after_loop` runs whenever a run ends, including after [`Loop::cancel`].

use std::any::type_name;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use guilder_core::{ClientError, ClientResult, ExponentialBackoff, ReadyGate};

use crate::error::HandlerError;

/// Error type returned by loop bodies.
pub type BoxError = Box<dyn StdError + Send + Sync>;

type Body = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorHook = Arc<dyn Fn(BoxError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Decides whether an error raised by the body may be retried.
pub type ErrorPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

fn interval_from(seconds: f64, minutes: f64, hours: f64) -> ClientResult<Duration> {
    for (value, unit) in [(seconds, "seconds"), (minutes, "minutes"), (hours, "hours")] {
        if !value.is_finite() || value < 0.0 {
            return Err(ClientError::invalid_argument(format!(
                "{unit} must be a non-negative number, got {value}"
            )));
        }
    }

    Duration::try_from_secs_f64(seconds + minutes * 60.0 + hours * 3600.0)
        .map_err(|e| ClientError::invalid_argument(format!("interval out of range: {e}")))
}

fn to_delta(interval: Duration) -> TimeDelta {
    TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX)
}

fn type_predicate<E: StdError + 'static>() -> ErrorPredicate {
    Arc::new(|err| err.is::<E>())
}

fn default_predicates() -> Vec<(String, ErrorPredicate)> {
    let client_error: ErrorPredicate = Arc::new(|err| {
        matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::Http(_) | ClientError::Transport(_) | ClientError::Timeout(_))
        )
    });

    vec![
        (type_name::<std::io::Error>().to_string(), type_predicate::<std::io::Error>()),
        (type_name::<ClientError>().to_string(), client_error),
        (
            type_name::<tokio::time::error::Elapsed>().to_string(),
            type_predicate::<tokio::time::error::Elapsed>(),
        ),
    ]
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`Loop`].
#[derive(Default)]
pub struct LoopBuilder {
    name: Option<String>,
    seconds: f64,
    minutes: f64,
    hours: f64,
    count: Option<u64>,
    reconnect: Option<bool>,
    ready: Option<ReadyGate>,
    before_loop: Option<Hook>,
    after_loop: Option<Hook>,
    on_error: Option<ErrorHook>,
}

impl LoopBuilder {
    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn seconds(mut self, seconds: f64) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn minutes(mut self, minutes: f64) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn hours(mut self, hours: f64) -> Self {
        self.hours = hours;
        self
    }

    /// Number of iterations before the loop ends; unbounded by default.
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Whether handled errors are retried. Defaults to `true`.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Delays the first iteration until the gate is ready.
    pub fn wait_until_ready(mut self, gate: ReadyGate) -> Self {
        self.ready = Some(gate);
        self
    }

    pub fn before_loop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.before_loop = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn after_loop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_loop = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// Replaces the default error hook, which logs the error.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(BoxError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |err| Box::pin(f(err))));
        self
    }

    /// Validates the configuration and creates the loop.
    pub fn build<F, Fut, E>(self, body: F) -> ClientResult<Loop>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let interval = interval_from(self.seconds, self.minutes, self.hours)?;
        if self.count == Some(0) {
            return Err(ClientError::invalid_argument("count must be greater than 0"));
        }

        let body: Body = Arc::new(move || {
            let fut = body();
            Box::pin(async move { fut.await.map_err(Into::into) })
        });

        Ok(Loop {
            inner: Arc::new(LoopInner {
                name: self.name.unwrap_or_else(|| "loop".to_string()),
                body,
                count: self.count,
                reconnect: self.reconnect.unwrap_or(true),
                interval: Mutex::new(interval),
                ready: self.ready,
                before_loop: self.before_loop,
                after_loop: self.after_loop,
                on_error: self.on_error,
                handled: RwLock::new(default_predicates()),
                state: Mutex::new(LoopState::default()),
                wake: Notify::new(),
            }),
        })
    }
}

// ============================================================================
// Loop
// ============================================================================

#[derive(Default)]
struct LoopState {
    cancel: Option<CancellationToken>,
    done: Option<CancellationToken>,
    current_loop: u64,
    last_iteration: Option<DateTime<Utc>>,
    next_iteration: Option<DateTime<Utc>>,
    last_instant: Option<Instant>,
    next_instant: Option<Instant>,
    stop_requested: bool,
    is_being_cancelled: bool,
    failed: bool,
}

impl LoopState {
    fn is_running(&self) -> bool {
        self.done.as_ref().is_some_and(|done| !done.is_cancelled())
    }

    fn schedule_from_last(&mut self, interval: Duration) {
        self.next_instant = self.last_instant.map(|last| last + interval);
        self.next_iteration = self.last_iteration.map(|last| last + to_delta(interval));
    }
}

struct LoopInner {
    name: String,
    body: Body,
    count: Option<u64>,
    reconnect: bool,
    interval: Mutex<Duration>,
    ready: Option<ReadyGate>,
    before_loop: Option<Hook>,
    after_loop: Option<Hook>,
    on_error: Option<ErrorHook>,
    handled: RwLock<Vec<(String, ErrorPredicate)>>,
    state: Mutex<LoopState>,
    /// Wakes the inter-iteration sleep on stop or interval change.
    wake: Notify,
}

/// A periodic background task. Clones control the same task.
#[derive(Clone)]
pub struct Loop {
    inner: Arc<LoopInner>,
}

impl Loop {
    pub fn builder() -> LoopBuilder {
        LoopBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn interval(&self) -> Duration {
        *self.inner.interval.lock()
    }

    pub fn count(&self) -> Option<u64> {
        self.inner.count
    }

    pub fn reconnect(&self) -> bool {
        self.inner.reconnect
    }

    /// Completed iterations of the current run.
    pub fn current_loop(&self) -> u64 {
        self.inner.state.lock().current_loop
    }

    pub fn last_iteration(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_iteration
    }

    /// When the next iteration starts; `None` when not running or stopping.
    pub fn next_iteration(&self) -> Option<DateTime<Utc>> {
        let state = self.inner.state.lock();
        if !state.is_running() || state.stop_requested {
            return None;
        }
        state.next_iteration
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().is_running()
    }

    pub fn is_being_cancelled(&self) -> bool {
        self.inner.state.lock().is_being_cancelled
    }

    /// Whether the last run ended with an unhandled error. Cleared by
    /// [`start`](Self::start).
    pub fn failed(&self) -> bool {
        self.inner.state.lock().failed
    }

    /// Spawns the loop task.
    ///
    /// Fails with [`ClientError::AlreadyRunning`] if a run is in progress.
    /// Must be called within a tokio runtime.
    pub fn start(&self) -> ClientResult<()> {
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        {
            let mut state = self.inner.state.lock();
            if state.is_running() {
                return Err(ClientError::AlreadyRunning("task loop"));
            }
            *state = LoopState {
                cancel: Some(cancel.clone()),
                done: Some(done.clone()),
                ..LoopState::default()
            };
        }

        debug!(task = %self.inner.name, "Starting background task");
        tokio::spawn(Arc::clone(&self.inner).run(cancel, done));
        Ok(())
    }

    /// Lets the current iteration finish, then ends the run.
    ///
    /// A body that keeps failing with handled errors is retried until it
    /// succeeds; clear the error types or use [`cancel`](Self::cancel) to
    /// avoid that.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if state.is_running() {
            state.stop_requested = true;
            drop(state);
            self.inner.wake.notify_waiters();
        }
    }

    /// Aborts the run at its current await point.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        if !state.is_running() || state.is_being_cancelled {
            return;
        }
        state.is_being_cancelled = true;
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
    }

    /// Cancels the current run, waits for it to finish and starts again.
    pub async fn restart(&self) -> ClientResult<()> {
        self.cancel();
        self.join().await;
        self.start()
    }

    /// Waits for the current run to end. Returns immediately when idle.
    pub async fn join(&self) {
        let done = self.inner.state.lock().done.clone();
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Changes the interval. A running loop reschedules its next iteration
    /// relative to the start of the last one.
    pub fn change_interval(&self, seconds: f64, minutes: f64, hours: f64) -> ClientResult<()> {
        let interval = interval_from(seconds, minutes, hours)?;
        *self.inner.interval.lock() = interval;

        let mut state = self.inner.state.lock();
        if state.is_running() && state.last_instant.is_some() {
            state.schedule_from_last(interval);
            drop(state);
            self.inner.wake.notify_waiters();
        }
        Ok(())
    }

    /// Treats errors of type `E` anywhere in the source chain as retryable.
    pub fn add_error_type<E: StdError + 'static>(&self) {
        self.add_error_predicate(type_name::<E>(), type_predicate::<E>());
    }

    /// Registers a named predicate. A predicate with the same name is
    /// replaced.
    pub fn add_error_predicate(&self, name: impl Into<String>, predicate: ErrorPredicate) {
        let name = name.into();
        let mut handled = self.inner.handled.write();
        handled.retain(|(existing, _)| *existing != name);
        handled.push((name, predicate));
    }

    pub fn remove_error_type<E: StdError + 'static>(&self) -> bool {
        self.remove_error_predicate(type_name::<E>())
    }

    /// Returns `true` if a predicate with that name was registered.
    pub fn remove_error_predicate(&self, name: &str) -> bool {
        let mut handled = self.inner.handled.write();
        let before = handled.len();
        handled.retain(|(existing, _)| existing != name);
        handled.len() != before
    }

    pub fn clear_error_types(&self) {
        self.inner.handled.write().clear();
    }

    pub fn handled_error_types(&self) -> Vec<String> {
        self.inner
            .handled
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("name", &self.inner.name)
            .field("interval", &self.interval())
            .field("count", &self.inner.count)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl LoopInner {
    async fn run(self: Arc<Self>, cancel: CancellationToken, done: CancellationToken) {
        // Cancelled when this task ends, even by a panicking hook.
        let _done = done.drop_guard();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %self.name, "Background task cancelled");
                Ok(())
            }
            result = AssertUnwindSafe(self.iterate()).catch_unwind() => {
                result.unwrap_or_else(|payload| Err(HandlerError::from_panic(payload).into()))
            }
        };

        if let Err(err) = result {
            self.state.lock().failed = true;
            match &self.on_error {
                Some(hook) => hook(err).await,
                None => error!(
                    task = %self.name,
                    error = %err,
                    "Unhandled exception in internal background task {:?}",
                    self.name
                ),
            }
        }

        if let Some(hook) = &self.after_loop {
            hook().await;
        }

        let mut state = self.state.lock();
        state.current_loop = 0;
        state.stop_requested = false;
        state.is_being_cancelled = false;
        state.next_iteration = None;
        state.next_instant = None;
    }

    async fn iterate(&self) -> Result<(), BoxError> {
        if let Some(gate) = &self.ready {
            gate.wait().await;
        }
        if let Some(hook) = &self.before_loop {
            hook().await;
        }

        let mut backoff = ExponentialBackoff::default();
        let mut last_failed = false;
        {
            let mut state = self.state.lock();
            state.next_iteration = Some(Utc::now());
            state.next_instant = Some(Instant::now());
        }

        loop {
            if !last_failed {
                let interval = *self.interval.lock();
                let mut state = self.state.lock();
                state.last_iteration = state.next_iteration;
                state.last_instant = state.next_instant;
                state.schedule_from_last(interval);
            }

            if let Err(err) = (self.body)().await {
                last_failed = true;
                if !self.reconnect || !self.is_handled(err.as_ref()) {
                    return Err(err);
                }
                let delay = backoff.delay();
                warn!(task = %self.name, error = %err, delay = ?delay, "Background task iteration failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
            last_failed = false;

            {
                let mut state = self.state.lock();
                let now = Instant::now();
                if state.next_instant.is_some_and(|next| now > next) {
                    state.next_instant = Some(now);
                    state.next_iteration = Some(Utc::now());
                }
                if state.stop_requested {
                    return Ok(());
                }
                if self.count == Some(state.current_loop + 1) {
                    state.current_loop += 1;
                    return Ok(());
                }
            }

            self.sleep_until_next().await;

            let mut state = self.state.lock();
            if state.stop_requested {
                return Ok(());
            }
            state.current_loop += 1;
        }
    }

    async fn sleep_until_next(&self) {
        loop {
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            let deadline = {
                let state = self.state.lock();
                if state.stop_requested {
                    return;
                }
                state.next_instant
            };
            let Some(deadline) = deadline else {
                return;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = &mut woken => continue,
            }
        }
    }

    fn is_handled(&self, err: &(dyn StdError + 'static)) -> bool {
        let handled = self.handled.read();
        let mut current = Some(err);
        while let Some(err) = current {
            if handled.iter().any(|(_, predicate)| predicate(err)) {
                return true;
            }
            current = err.source();
        }
        false
    }
}
