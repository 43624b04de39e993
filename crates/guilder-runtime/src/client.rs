//! The client: credentials, REST core, gateway connection and handler
//! registry behind one handle.
//!
//! ```rust,ignore
//! let client = Client::builder()
//!     .token(token)
//!     .matcher(on_message().handler(reply))
//!     .build()?;
//!
//! client.run().await?;
//! ```
//!
//! [`ClientHandle`] is the cheap, cloneable side of a [`Client`]. It is also
//! the [`Session`] every handler receives, so handlers can extract
//! `SessionRef<ClientHandle>` to reach the full client.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use guilder_core::{
    ChatMessage, ClientError, ClientResult, Event, EventKind, ReadyGate, Session, User,
};
use guilder_framework::{Context, Dispatcher, HandlerError, Loop, LoopBuilder, Matcher};
use guilder_gateway::{EventSink, GatewayConfig, GatewaySession};
use guilder_transport::{ConnectionHandle, HttpClient};

use crate::config::{ConfigLoader, GuilderConfig};
use crate::error::RuntimeResult;

/// How long `close` waits for the socket loop to exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Login credentials.
#[derive(Clone)]
pub enum Credentials {
    /// A bot token.
    Token(String),
    /// Email and password. Accepted for compatibility; the bot API rejects
    /// them at `start`.
    Legacy { email: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.debug_tuple("Token").field(&"[redacted]").finish(),
            Self::Legacy { email, .. } => f
                .debug_struct("Legacy")
                .field("email", email)
                .field("password", &"[redacted]")
                .finish(),
        }
    }
}

type SetupHook = Arc<dyn Fn(ClientHandle) -> BoxFuture<'static, ClientResult<()>> + Send + Sync>;

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: GuilderConfig,
    credentials: Option<Credentials>,
    dispatcher: Dispatcher,
    setup_hook: Option<SetupHook>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: GuilderConfig::default(),
            credentials: None,
            dispatcher: Dispatcher::new(),
            setup_hook: None,
        }
    }

    /// Replaces the configuration. Setters called afterwards override it.
    pub fn config(mut self, config: GuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Token(token.into()));
        self
    }

    /// Email/password login. `start` fails with [`ClientError::UnsupportedLogin`].
    pub fn login(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::Legacy {
            email: email.into(),
            password: password.into(),
        });
        self
    }

    /// Bound of the message cache; `None` disables it.
    pub fn max_messages(mut self, max: Option<usize>) -> Self {
        self.config.client.max_messages = max.unwrap_or(0);
        self
    }

    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.config.gateway.url = url.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.http.base_url = url.into();
        self
    }

    /// Whether the gateway reconnects after a drop. Without it a drop ends
    /// [`ClientHandle::run`].
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.config.gateway.auto_reconnect = reconnect;
        self
    }

    pub fn matcher(self, matcher: Matcher) -> Self {
        self.dispatcher.add(matcher);
        self
    }

    pub fn matchers(self, matchers: impl IntoIterator<Item = Matcher>) -> Self {
        for matcher in matchers {
            self.dispatcher.add(matcher);
        }
        self
    }

    /// Replaces the handler that receives handler failures.
    pub fn on_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<Context>, HandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.on_error(f);
        self
    }

    /// Runs in `start`, after the credential checks and before the gateway
    /// connects. An error aborts the start.
    ///
    /// The hook runs until it first succeeds: a start that fails in the hook
    /// runs it again on retry, one that fails later while connecting does not.
    pub fn setup_hook<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ClientHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientResult<()>> + Send + 'static,
    {
        self.setup_hook = Some(Arc::new(move |handle| Box::pin(f(handle))));
        self
    }

    /// Creates the client. Nothing connects until [`ClientHandle::start`].
    ///
    /// Without explicit credentials the configured `client.token` is used.
    pub fn build(self) -> ClientResult<Client> {
        let credentials = self
            .credentials
            .or_else(|| self.config.client.token.clone().map(Credentials::Token));

        let token = match &credentials {
            Some(Credentials::Token(token)) => Some(token.clone()),
            _ => None,
        };
        let http = HttpClient::new(self.config.http.to_http_config(token))?;

        debug!(
            credentials = ?credentials,
            matchers = self.dispatcher.matcher_count(),
            "Client built"
        );

        Ok(Client {
            handle: ClientHandle {
                inner: Arc::new(ClientInner {
                    config: self.config,
                    credentials,
                    http,
                    dispatcher: self.dispatcher,
                    ready: ReadyGate::new(),
                    gateway: RwLock::new(None),
                    connection: Mutex::new(None),
                    setup_hook: self.setup_hook,
                    setup_done: AtomicBool::new(false),
                    started: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                }),
            },
        })
    }
}

// =============================================================================
// Client
// =============================================================================

struct ClientInner {
    config: GuilderConfig,
    credentials: Option<Credentials>,
    http: HttpClient,
    dispatcher: Dispatcher,
    ready: ReadyGate,
    gateway: RwLock<Option<Arc<GatewaySession>>>,
    connection: Mutex<Option<ConnectionHandle>>,
    setup_hook: Option<SetupHook>,
    setup_done: AtomicBool,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Owner of a client. Dropping it asks the gateway connection to close.
///
/// Dereferences to [`ClientHandle`].
pub struct Client {
    handle: ClientHandle,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Builds a client from a configuration loader.
    pub fn from_loader(loader: ConfigLoader) -> RuntimeResult<Self> {
        let config = loader.load()?;
        Ok(ClientBuilder::new().config(config).build()?)
    }

    /// A cloneable handle sharing this client.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }
}

impl Deref for Client {
    type Target = ClientHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(connection) = self.handle.inner.connection.lock().take() {
            connection.close();
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.handle, f)
    }
}

/// Shared handle to a [`Client`].
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    /// Checks the credentials, runs the setup hook and connects the gateway.
    ///
    /// Returns once the first handshake succeeded; events then flow in the
    /// background. A failed start may be retried.
    pub async fn start(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let token = match &self.inner.credentials {
            Some(Credentials::Token(token)) => token.clone(),
            Some(Credentials::Legacy { .. }) => return Err(ClientError::UnsupportedLogin),
            None => return Err(ClientError::MissingToken),
        };
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning("client"));
        }

        let result = self.connect(token).await;
        if result.is_err() && !self.is_closed() {
            self.inner.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn connect(&self, token: String) -> ClientResult<()> {
        if let Some(hook) = &self.inner.setup_hook
            && !self.inner.setup_done.load(Ordering::SeqCst)
        {
            debug!("Running setup hook");
            hook(self.clone()).await?;
            self.inner.setup_done.store(true, Ordering::SeqCst);
        }

        let gateway_config = GatewayConfig {
            token,
            user_agent: self.inner.config.http.user_agent().to_string(),
            max_messages: self.inner.config.client.message_cache_limit(),
        };
        let session = Arc::new(GatewaySession::new(
            gateway_config,
            self.inner.ready.clone(),
            self.event_sink(),
        ));
        *self.inner.gateway.write() = Some(Arc::clone(&session));

        let ws = self.inner.config.gateway.to_ws_config();
        info!(url = %ws.url, "Connecting to gateway");
        let connection = session.connect(ws).await?;

        if self.is_closed() {
            connection.close();
            return Err(ClientError::Closed);
        }
        *self.inner.connection.lock() = Some(connection);
        Ok(())
    }

    /// Gateway events go straight to the dispatcher. The sink holds the
    /// client weakly so the connection never keeps it alive.
    fn event_sink(&self) -> EventSink {
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                ClientHandle { inner }.dispatch(event);
            }
        })
    }

    /// Starts the client and waits for ctrl-c, SIGTERM or the end of the
    /// gateway connection, then closes.
    pub async fn run(&self) -> ClientResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown future.
    pub async fn run_until<F>(&self, shutdown: F) -> ClientResult<()>
    where
        F: Future<Output = ()>,
    {
        match self.start().await {
            // closed while connecting
            Err(ClientError::Closed) if self.inner.started.load(Ordering::SeqCst) => return Ok(()),
            result => result?,
        }
        let connection = self.inner.connection.lock().clone();
        let Some(connection) = connection else {
            return Err(ClientError::Closed);
        };

        info!("Client is running");
        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = connection.stopped() => info!("Gateway connection ended"),
        }

        self.close().await;
        Ok(())
    }

    /// Closes the gateway with code 1000 and clears readiness.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing client");

        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            connection.close();
            if tokio::time::timeout(CLOSE_TIMEOUT, connection.stopped())
                .await
                .is_err()
            {
                warn!(timeout = ?CLOSE_TIMEOUT, "Gateway did not shut down in time");
            }
        }
        self.inner.ready.clear();
    }

    /// Routes an event to waiters and matchers with this client as the
    /// session. A ready event also records the bot's user id for REST calls.
    pub fn dispatch(&self, event: Event) -> Vec<JoinHandle<()>> {
        if let Event::Ready(ready) = &event {
            self.inner.http.set_my_id(ready.user.id.clone());
        }
        self.inner
            .dispatcher
            .dispatch(event, Arc::new(self.clone()))
    }

    /// Registers a matcher after the client was built.
    pub fn register(&self, matcher: Matcher) {
        self.inner.dispatcher.add(matcher);
    }

    /// Waits for the next event of `kind` passing `check`.
    ///
    /// The waiter is registered immediately. See [`Dispatcher::wait_for`].
    pub fn wait_for<F>(
        &self,
        kind: EventKind,
        check: F,
        timeout: Option<Duration>,
    ) -> impl Future<Output = ClientResult<Arc<Event>>> + Send + 'static
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.inner.dispatcher.wait_for(kind, check, timeout)
    }

    pub async fn wait_until_ready(&self) {
        self.inner.ready.wait().await
    }

    /// A task loop builder gated on this client becoming ready.
    pub fn task_loop(&self) -> LoopBuilder {
        Loop::builder().wait_until_ready(self.inner.ready.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The bot user, once the gateway has welcomed the client.
    pub fn user(&self) -> Option<User> {
        self.gateway().and_then(|g| g.user())
    }

    pub fn latency(&self) -> Option<Duration> {
        self.gateway().and_then(|g| g.latency())
    }

    /// Messages seen on the gateway, oldest first.
    pub fn cached_messages(&self) -> Vec<ChatMessage> {
        self.gateway()
            .map(|g| g.cached_messages())
            .unwrap_or_default()
    }

    pub fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn ready_gate(&self) -> &ReadyGate {
        &self.inner.ready
    }

    pub fn config(&self) -> &GuilderConfig {
        &self.inner.config
    }

    fn gateway(&self) -> Option<Arc<GatewaySession>> {
        self.inner.gateway.read().clone()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("credentials", &self.inner.credentials)
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Session for ClientHandle {
    fn user(&self) -> Option<User> {
        ClientHandle::user(self)
    }

    fn latency(&self) -> Option<Duration> {
        ClientHandle::latency(self)
    }

    fn is_ready(&self) -> bool {
        ClientHandle::is_ready(self)
    }

    async fn create_message(&self, channel_id: &str, content: &str) -> ClientResult<ChatMessage> {
        self.inner
            .http
            .create_channel_message(channel_id, content)
            .await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
///
/// A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
