//! Websocket client with heartbeat and reconnection.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::WsClientConfig;
use super::connection::{CloseAction, ConnectionHandle, ConnectionHandler, FrameAction};
use guilder_core::{Backoff, TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Smallest accepted heartbeat period.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Websocket client entry point.
pub struct WsClient;

impl WsClient {
    /// Opens the first connection and spawns the client loop.
    ///
    /// A failed first handshake is returned to the caller; later drops are
    /// handled by the loop according to `config`.
    pub async fn connect(
        config: WsClientConfig,
        handler: Arc<dyn ConnectionHandler>,
    ) -> TransportResult<ConnectionHandle> {
        let (message_tx, message_rx) = mpsc::channel::<String>(256);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let stopped = CancellationToken::new();
        let handle = ConnectionHandle::new(message_tx, shutdown_tx, stopped.clone());

        info!(url = %config.url, "Connecting to websocket server");
        let stream = open(&config, handler.as_ref()).await?;
        info!(url = %config.url, "Websocket client connected");

        let shutdown_rx = handle.subscribe_shutdown();
        tokio::spawn(async move {
            run_client_loop(stream, message_rx, shutdown_rx, Arc::clone(&handler), config).await;
            handler.on_shutdown().await;
            stopped.cancel();
        });

        Ok(handle)
    }
}

/// Performs one handshake, including the handler's headers.
async fn open(config: &WsClientConfig, handler: &dyn ConnectionHandler) -> TransportResult<WsStream> {
    let mut request =
        config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

    for (name, value) in handler.request_headers().await {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| TransportError::Protocol(format!("invalid value for '{name}': {e}")))?;
        request.headers_mut().insert(header, value);
    }

    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Err(TransportError::Timeout(config.connect_timeout)),
    }
}

/// How a single connection ended.
enum ConnectionEnd {
    /// The handle asked the loop to stop.
    Shutdown,
    /// The peer or the network dropped the connection.
    Dropped { code: Option<u16>, reason: String },
}

/// Runs connections back to back until the handle asks for shutdown, the
/// handler returns [`CloseAction::Stop`] or reconnecting is given up.
async fn run_client_loop(
    mut stream: WsStream,
    mut message_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
    handler: Arc<dyn ConnectionHandler>,
    config: WsClientConfig,
) {
    let mut backoff = Backoff::new(
        config.initial_delay,
        config.backoff_multiplier,
        config.max_delay,
    );
    if config.jitter {
        backoff = backoff.with_jitter();
    }
    let mut retry_count = 0u32;

    loop {
        handler.on_connect().await;

        let end = drive_connection(
            stream,
            &mut message_rx,
            &mut shutdown_rx,
            handler.as_ref(),
            &config,
            &mut backoff,
            &mut retry_count,
        )
        .await;

        let (code, reason) = match end {
            ConnectionEnd::Shutdown => return,
            ConnectionEnd::Dropped { code, reason } => (code, reason),
        };

        info!(code = ?code, reason = %reason, "Websocket connection closed");
        let action = handler.on_close(code, &reason).await;

        if action == CloseAction::Stop || !config.auto_reconnect {
            debug!(code = ?code, action = ?action, "Not reconnecting");
            return;
        }

        match reconnect(
            &config,
            handler.as_ref(),
            &mut shutdown_rx,
            &mut backoff,
            &mut retry_count,
        )
        .await
        {
            Some(next) => stream = next,
            None => return,
        }
    }
}

/// Pumps one connection until it drops or shutdown is requested.
async fn drive_connection(
    stream: WsStream,
    message_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
    handler: &dyn ConnectionHandler,
    config: &WsClientConfig,
    backoff: &mut Backoff,
    retry_count: &mut u32,
) -> ConnectionEnd {
    let (mut sink, mut source): (WsSink, WsSource) = stream.split();
    let mut heartbeat: Option<Interval> = None;
    let mut last_ping: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Websocket client shutting down");
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            }

            Some(text) = message_rx.recv() => {
                handler.on_send(&text).await;
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Failed to send frame");
                }
            }

            _ = next_tick(&mut heartbeat) => {
                trace!("Sending heartbeat");
                match sink.send(Message::Ping(Default::default())).await {
                    Ok(()) => last_ping = Some(Instant::now()),
                    Err(e) => warn!(error = %e, "Failed to send heartbeat"),
                }
            }

            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received text");
                    backoff.reset();
                    *retry_count = 0;
                    if let FrameAction::StartHeartbeat(period) = handler.on_message(text.as_str()).await {
                        debug!(period = ?period, "Starting heartbeat");
                        heartbeat = Some(heartbeat_interval(period));
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Received binary");
                    backoff.reset();
                    *retry_count = 0;
                    let text = String::from_utf8_lossy(&data);
                    if let FrameAction::StartHeartbeat(period) = handler.on_message(&text).await {
                        heartbeat = Some(heartbeat_interval(period));
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    if let Some(sent) = last_ping.take() {
                        let latency = sent.elapsed();
                        if latency > config.latency_warning {
                            warn!(latency = ?latency, "Can't keep up, websocket is behind");
                        }
                        handler.on_pong(latency).await;
                    }
                }
                Some(Ok(Message::Ping(_))) => {
                    trace!("Received ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_string()),
                        None => (None, String::new()),
                    };
                    return ConnectionEnd::Dropped { code, reason };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Websocket error");
                    return ConnectionEnd::Dropped { code: None, reason: e.to_string() };
                }
                None => {
                    return ConnectionEnd::Dropped {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }
}

/// Sleeps with backoff and reconnects. Returns `None` when giving up.
async fn reconnect(
    config: &WsClientConfig,
    handler: &dyn ConnectionHandler,
    shutdown_rx: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
    retry_count: &mut u32,
) -> Option<WsStream> {
    loop {
        if let Some(max) = config.max_retries
            && *retry_count >= max
        {
            error!(retries = *retry_count, "Max retries reached, giving up");
            return None;
        }

        let delay = backoff.next_delay();
        warn!(delay = ?delay, "Reconnecting...");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }
        }

        match open(config, handler).await {
            Ok(stream) => {
                info!("Reconnected successfully");
                return Some(stream);
            }
            Err(e) => {
                warn!(error = %e, "Reconnection failed");
                *retry_count += 1;
                handler.on_connect_error(&e).await;
            }
        }
    }
}

fn heartbeat_interval(period: Duration) -> Interval {
    let period = period.max(MIN_HEARTBEAT);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::Router;
    use axum::extract::State;
    use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
    use axum::http::HeaderMap;
    use axum::response::Response;
    use axum::routing::get;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        log: Mutex<Vec<String>>,
        cursor: Mutex<Option<String>>,
        heartbeat: Option<Duration>,
        stop_on: Option<u16>,
        pong: Notify,
    }

    impl RecordingHandler {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl ConnectionHandler for RecordingHandler {
        async fn request_headers(&self) -> Vec<(String, String)> {
            match self.cursor.lock().clone() {
                Some(cursor) => vec![("x-cursor".to_string(), cursor)],
                None => Vec::new(),
            }
        }

        async fn on_connect(&self) {
            self.log.lock().push("connect".to_string());
        }

        async fn on_message(&self, text: &str) -> FrameAction {
            self.log.lock().push(text.to_string());
            *self.cursor.lock() = Some(text.to_string());
            match self.heartbeat {
                Some(period) => FrameAction::StartHeartbeat(period),
                None => FrameAction::Continue,
            }
        }

        async fn on_send(&self, text: &str) {
            self.log.lock().push(format!("send:{text}"));
        }

        async fn on_pong(&self, _latency: Duration) {
            self.pong.notify_one();
        }

        async fn on_close(&self, code: Option<u16>, _reason: &str) -> CloseAction {
            self.log.lock().push(format!("close:{}", code.unwrap_or_default()));
            if code.is_some() && code == self.stop_on {
                CloseAction::Stop
            } else {
                CloseAction::Reconnect
            }
        }

        async fn on_shutdown(&self) {
            self.log.lock().push("shutdown".to_string());
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("ws://{addr}/")
    }

    async fn close_with(socket: &mut WebSocket, code: u16) {
        let frame = ws::CloseFrame {
            code,
            reason: "bye".into(),
        };
        let _ = socket.send(ws::Message::Close(Some(frame))).await;
        while let Some(Ok(_)) = socket.recv().await {}
    }

    async fn cursor_server(
        ws: WebSocketUpgrade,
        headers: HeaderMap,
        State(connections): State<Arc<AtomicUsize>>,
    ) -> Response {
        let cursor = headers
            .get("x-cursor")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none")
            .to_string();
        let n = connections.fetch_add(1, Ordering::SeqCst);
        ws.on_upgrade(move |mut socket| async move {
            let _ = socket
                .send(ws::Message::Text(format!("{n}:{cursor}").into()))
                .await;
            close_with(&mut socket, if n == 0 { 1000 } else { STOP_CODE }).await;
        })
    }

    const STOP_CODE: u16 = 4001;

    fn stopping_handler() -> Arc<RecordingHandler> {
        Arc::new(RecordingHandler {
            stop_on: Some(STOP_CODE),
            ..Default::default()
        })
    }

    fn fast_config(url: String) -> WsClientConfig {
        WsClientConfig::new(url).with_delays(Duration::from_millis(10), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_peer_normal_close_reconnects_with_fresh_headers() {
        let connections = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/", get(cursor_server))
            .with_state(Arc::clone(&connections));
        let url = serve(app).await;

        let handler = stopping_handler();
        let handle = WsClient::connect(fast_config(url), handler.clone())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(
            handler.log(),
            vec![
                "connect",
                "0:none",
                "close:1000",
                "connect",
                "1:0:none",
                "close:4001",
                "shutdown",
            ]
        );
    }

    #[tokio::test]
    async fn test_handler_stop_ends_loop() {
        let app = Router::new().route(
            "/",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|mut socket| async move {
                    let _ = socket.send(ws::Message::Text("hello".into())).await;
                    close_with(&mut socket, STOP_CODE).await;
                })
            }),
        );
        let url = serve(app).await;

        let handler = stopping_handler();
        let handle = WsClient::connect(fast_config(url), handler.clone())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();

        assert!(handle.is_closed());
        assert_eq!(handler.log(), vec!["connect", "hello", "close:4001", "shutdown"]);
    }

    #[tokio::test]
    async fn test_send_notifies_handler_before_writing() {
        let app = Router::new().route(
            "/",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|mut socket| async move {
                    while let Some(Ok(message)) = socket.recv().await {
                        if let ws::Message::Text(text) = message {
                            let _ = socket.send(ws::Message::Text(text)).await;
                        }
                    }
                })
            }),
        );
        let url = serve(app).await;

        let handler = Arc::new(RecordingHandler::default());
        let handle = WsClient::connect(fast_config(url), handler.clone())
            .await
            .unwrap();
        handle.send("echo-me".to_string()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.log().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.close();
        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();
        assert_eq!(
            handler.log(),
            vec!["connect", "send:echo-me", "echo-me", "shutdown"]
        );
    }

    #[tokio::test]
    async fn test_no_reconnect_config() {
        let connections = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/", get(cursor_server))
            .with_state(Arc::clone(&connections));
        let url = serve(app).await;

        let handler = Arc::new(RecordingHandler::default());
        let handle = WsClient::connect(WsClientConfig::no_reconnect(url), handler.clone())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert_eq!(handler.log().last().map(String::as_str), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_heartbeat_and_shutdown() {
        let app = Router::new().route(
            "/",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|mut socket| async move {
                    let _ = socket.send(ws::Message::Text("welcome".into())).await;
                    while let Some(Ok(_)) = socket.recv().await {}
                })
            }),
        );
        let url = serve(app).await;

        let handler = Arc::new(RecordingHandler {
            heartbeat: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let handle = WsClient::connect(fast_config(url), handler.clone())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handler.pong.notified())
            .await
            .unwrap();

        handle.close();
        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();
        assert_eq!(handler.log(), vec!["connect", "welcome", "shutdown"]);
    }

    #[tokio::test]
    async fn test_failed_first_handshake() {
        let handler = Arc::new(RecordingHandler::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsClient::connect(fast_config(format!("ws://{addr}/")), handler).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}
