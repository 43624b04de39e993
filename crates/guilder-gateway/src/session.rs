//! The gateway side of a websocket connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{DEFAULT_MAX_MESSAGES, GatewayCache};
use crate::frame::{GatewayFrame, Opcode, Welcome, close_invalidates_cursor};
use crate::parser::parse_dispatch;
use guilder_core::{
    ChatMessage, ClientError, ConnectEvent, DisconnectEvent, ErrorEvent, Event, RawSocketEvent,
    ReadyEvent, ReadyGate, ResumedEvent, TransportError, TransportResult, USER_AGENT, User,
};
use guilder_transport::websocket::{
    CloseAction, ConnectionHandle, ConnectionHandler, FrameAction, WsClient, WsClientConfig,
};

/// Handshake header carrying the resume cursor.
pub const RESUME_HEADER: &str = "guilded-last-message-id";

/// Receives every event the gateway produces.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Settings for a [`GatewaySession`].
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub user_agent: String,
    /// Bound of the message cache; `None` disables it.
    pub max_messages: Option<usize>,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_agent: USER_AGENT.to_string(),
            max_messages: Some(DEFAULT_MAX_MESSAGES),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"[redacted]")
            .field("user_agent", &self.user_agent)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

/// Protocol state that survives reconnects: resume cursor, caches, the bot
/// user and the heartbeat latency.
pub struct GatewaySession {
    config: GatewayConfig,
    cursor: Mutex<Option<String>>,
    cache: Mutex<GatewayCache>,
    user: RwLock<Option<User>>,
    latency: RwLock<Option<Duration>>,
    ready: ReadyGate,
    sink: EventSink,
}

impl GatewaySession {
    pub fn new(config: GatewayConfig, ready: ReadyGate, sink: EventSink) -> Self {
        Self {
            cache: Mutex::new(GatewayCache::new(config.max_messages)),
            config,
            cursor: Mutex::new(None),
            user: RwLock::new(None),
            latency: RwLock::new(None),
            ready,
            sink,
        }
    }

    /// Opens the gateway connection driven by this session.
    pub async fn connect(
        self: &Arc<Self>,
        ws: WsClientConfig,
    ) -> TransportResult<ConnectionHandle> {
        WsClient::connect(ws, Arc::clone(self) as Arc<dyn ConnectionHandler>).await
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    /// Last measured ping-to-pong round trip.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.read()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// The resume cursor sent on the next handshake.
    pub fn cursor(&self) -> Option<String> {
        self.cursor.lock().clone()
    }

    /// Cached messages, oldest first.
    pub fn cached_messages(&self) -> Vec<ChatMessage> {
        self.cache.lock().messages.messages()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn emit(&self, event: Event) {
        (self.sink)(event);
    }

    fn emit_error(&self, source_event: Option<String>, error: ClientError) {
        self.emit(Event::Error(ErrorEvent {
            source_event,
            error,
        }));
    }

    /// Processes one text frame.
    pub fn handle_frame(&self, text: &str) -> FrameAction {
        self.emit(Event::SocketRawReceive(RawSocketEvent {
            payload: text.to_string(),
        }));

        let frame = match GatewayFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to decode gateway frame");
                self.emit_error(None, e);
                return FrameAction::Continue;
            }
        };

        trace!(op = frame.op, t = ?frame.t, "Gateway frame received");

        if let Some(cursor) = &frame.s {
            *self.cursor.lock() = Some(cursor.clone());
        }

        match frame.opcode() {
            Some(Opcode::Welcome) => return self.handle_welcome(frame),
            Some(Opcode::Missable) => self.handle_dispatch(frame),
            Some(Opcode::Resumed) => {
                info!("Gateway session resumed");
                self.emit(Event::Resumed(ResumedEvent));
            }
            Some(Opcode::InvalidCursor) => {
                error!(message = %frame.error_message(), "Invalid cursor");
                *self.cursor.lock() = None;
            }
            Some(Opcode::InternalError) => {
                let message = frame.error_message().to_string();
                error!(message = %message, "Internal gateway error");
                self.emit_error(
                    None,
                    TransportError::Protocol(format!("internal gateway error: {message}")).into(),
                );
            }
            None => debug!(op = frame.op, "Ignoring unknown opcode"),
        }

        FrameAction::Continue
    }

    fn handle_welcome(&self, frame: GatewayFrame) -> FrameAction {
        let welcome: Welcome = match serde_json::from_value(frame.d) {
            Ok(welcome) => welcome,
            Err(e) => {
                warn!(error = %e, "Malformed welcome");
                self.emit_error(None, e.into());
                return FrameAction::Continue;
            }
        };

        *self.cursor.lock() = welcome.last_message_id.clone();
        *self.user.write() = Some(welcome.user.clone());
        self.ready.set_ready();

        info!(
            user = %welcome.user.name,
            heartbeat = ?welcome.heartbeat_interval(),
            "Gateway welcomed us"
        );
        self.emit(Event::Ready(ReadyEvent {
            user: welcome.user.clone(),
        }));

        FrameAction::StartHeartbeat(welcome.heartbeat_interval())
    }

    fn handle_dispatch(&self, frame: GatewayFrame) {
        let Some(name) = frame.t.as_deref() else {
            debug!("Dispatch without an event name");
            return;
        };

        let me = self.user.read().as_ref().map(|user| user.id.clone());
        let result = parse_dispatch(name, frame.d, &mut self.cache.lock(), me.as_deref());

        match result {
            Ok(events) => {
                if events.is_empty() {
                    trace!(event = %name, "Dispatch produced no events");
                }
                for event in events {
                    self.emit(event);
                }
            }
            Err(error) => {
                warn!(event = %name, error = %error, "Failed to parse gateway event");
                self.emit_error(Some(name.to_string()), error);
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for GatewaySession {
    async fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.config.token),
            ),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
        ];
        if let Some(cursor) = self.cursor() {
            debug!(cursor = %cursor, "Resuming gateway session");
            headers.push((RESUME_HEADER.to_string(), cursor));
        }
        headers
    }

    async fn on_connect(&self) {
        info!("Connected to the gateway");
        self.emit(Event::Connect(ConnectEvent));
    }

    async fn on_message(&self, text: &str) -> FrameAction {
        self.handle_frame(text)
    }

    async fn on_send(&self, text: &str) {
        self.emit(Event::SocketRawSend(RawSocketEvent {
            payload: text.to_string(),
        }));
    }

    async fn on_pong(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    async fn on_close(&self, code: Option<u16>, reason: &str) -> CloseAction {
        if close_invalidates_cursor(reason) {
            warn!("Gateway rejected the resume cursor; starting fresh");
            *self.cursor.lock() = None;
        }

        self.ready.clear();
        self.emit(Event::Disconnect(DisconnectEvent {
            code,
            reason: reason.to_string(),
        }));

        // Only `close()` on the handle ends the session.
        CloseAction::Reconnect
    }

    async fn on_connect_error(&self, error: &TransportError) {
        debug!(error = %error, "Gateway reconnect attempt failed");
    }

    async fn on_shutdown(&self) {
        self.ready.clear();
        info!("Gateway connection stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::ws::{self, WebSocketUpgrade};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use guilder_core::EventKind;

    fn session() -> (Arc<GatewaySession>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink: EventSink = Arc::new(move |event| sink_events.lock().push(event));
        let session = GatewaySession::new(GatewayConfig::new("tkn"), ReadyGate::new(), sink);
        (Arc::new(session), events)
    }

    fn kinds(events: &Mutex<Vec<Event>>) -> Vec<EventKind> {
        events.lock().iter().map(Event::kind).collect()
    }

    const WELCOME: &str = r#"{"op":1,"d":{"heartbeatIntervalMs":22500,"lastMessageId":"c0","user":{"id":"bot","name":"Bot","type":"bot"}}}"#;

    #[test]
    fn test_welcome_sets_ready() {
        let (session, events) = session();
        let action = session.handle_frame(WELCOME);

        assert_eq!(action, FrameAction::StartHeartbeat(Duration::from_millis(22500)));
        assert!(session.is_ready());
        assert_eq!(session.user().map(|u| u.id), Some("bot".to_string()));
        assert_eq!(session.cursor().as_deref(), Some("c0"));
        assert_eq!(kinds(&events), vec![EventKind::SocketRawReceive, EventKind::Ready]);
    }

    #[test]
    fn test_dispatch_tracks_cursor() {
        let (session, events) = session();
        session.handle_frame(WELCOME);
        let frame = json!({
            "op": 0,
            "t": "ChatMessageCreated",
            "s": "c1",
            "d": {"serverId": "s1", "message": {"id": "m1", "channelId": "ch", "content": "hi"}}
        });
        session.handle_frame(&frame.to_string());

        assert_eq!(session.cursor().as_deref(), Some("c1"));
        assert_eq!(kinds(&events).last(), Some(&EventKind::Message));
        assert_eq!(session.cached_messages().len(), 1);
    }

    #[test]
    fn test_bad_frames_emit_errors_and_continue() {
        let (session, events) = session();

        assert_eq!(session.handle_frame("not json"), FrameAction::Continue);
        let frame = json!({"op": 0, "t": "ChatMessageCreated", "d": {"serverId": "s1"}});
        assert_eq!(session.handle_frame(&frame.to_string()), FrameAction::Continue);

        let recorded = events.lock();
        let errors: Vec<_> = recorded
            .iter()
            .filter_map(|e| match e {
                Event::Error(err) => Some(err.source_event.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![None, Some("ChatMessageCreated".to_string())]);
    }

    #[test]
    fn test_invalid_cursor_and_internal_error() {
        let (session, events) = session();
        session.handle_frame(WELCOME);

        session.handle_frame(r#"{"op":8,"d":{"message":"stale"}}"#);
        assert_eq!(session.cursor(), None);

        session.handle_frame(r#"{"op":9,"d":{"message":"oops"}}"#);
        assert_eq!(kinds(&events).last(), Some(&EventKind::Error));

        session.handle_frame(r#"{"op":2,"d":{}}"#);
        assert_eq!(kinds(&events).last(), Some(&EventKind::Resumed));
    }

    #[tokio::test]
    async fn test_handshake_headers() {
        let (session, _events) = session();
        let headers = session.request_headers().await;
        assert!(headers.contains(&("Authorization".to_string(), "Bearer tkn".to_string())));
        assert!(!headers.iter().any(|(name, _)| name == RESUME_HEADER));

        session.handle_frame(WELCOME);
        let headers = session.request_headers().await;
        assert!(headers.contains(&(RESUME_HEADER.to_string(), "c0".to_string())));
    }

    #[tokio::test]
    async fn test_close_handling() {
        let (session, events) = session();
        session.handle_frame(WELCOME);

        let action = session.on_close(Some(4000), r#"{"op":8}"#).await;
        assert_eq!(action, CloseAction::Reconnect);
        assert_eq!(session.cursor(), None);
        assert!(!session.is_ready());
        assert_eq!(kinds(&events).last(), Some(&EventKind::Disconnect));

        assert_eq!(session.on_close(Some(1000), "").await, CloseAction::Reconnect);
        assert_eq!(session.on_close(None, "reset").await, CloseAction::Reconnect);
    }

    #[tokio::test]
    async fn test_send_emits_raw_event() {
        let (session, events) = session();
        session.on_send(r#"{"op":0}"#).await;

        match events.lock().last() {
            Some(Event::SocketRawSend(raw)) => assert_eq!(raw.payload, r#"{"op":0}"#),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pong_records_latency() {
        let (session, _events) = session();
        assert_eq!(session.latency(), None);
        session.on_pong(Duration::from_millis(42)).await;
        assert_eq!(session.latency(), Some(Duration::from_millis(42)));
    }

    /// Serves a gateway that records each handshake's resume header. The
    /// first connection welcomes, dispatches cursor `c1` and drops; the second
    /// drops with an invalid-cursor reason; later ones stay open.
    async fn resume_gateway(headers_tx: mpsc::UnboundedSender<Option<String>>) -> String {
        let connections = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/",
            get(move |ws: WebSocketUpgrade, headers: HeaderMap| {
                let headers_tx = headers_tx.clone();
                let n = connections.fetch_add(1, Ordering::SeqCst);
                async move {
                    let cursor = headers
                        .get(RESUME_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = headers_tx.send(cursor);
                    ws.on_upgrade(move |mut socket| async move {
                        let reason = match n {
                            0 => {
                                let dispatch = json!({
                                    "op": 0,
                                    "t": "ChatMessageCreated",
                                    "s": "c1",
                                    "d": {"serverId": "s1", "message": {"id": "m1", "channelId": "ch", "content": "hi"}}
                                });
                                let _ = socket.send(ws::Message::Text(WELCOME.into())).await;
                                let _ = socket
                                    .send(ws::Message::Text(dispatch.to_string().into()))
                                    .await;
                                ""
                            }
                            1 => r#"{"op":8,"d":{"message":"stale"}}"#,
                            _ => {
                                while let Some(Ok(_)) = socket.recv().await {}
                                return;
                            }
                        };
                        let frame = ws::CloseFrame {
                            code: 4000,
                            reason: reason.into(),
                        };
                        let _ = socket.send(ws::Message::Close(Some(frame))).await;
                        while let Some(Ok(_)) = socket.recv().await {}
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("ws://{addr}/")
    }

    #[tokio::test]
    async fn test_reconnect_resumes_from_last_cursor() {
        let (headers_tx, mut headers_rx) = mpsc::unbounded_channel();
        let url = resume_gateway(headers_tx).await;

        let (session, events) = session();
        let ws = WsClientConfig::new(url)
            .with_delays(Duration::from_millis(10), Duration::from_millis(50));
        let handle = session.connect(ws).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let cursor = tokio::time::timeout(Duration::from_secs(5), headers_rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(cursor);
        }
        assert_eq!(seen, vec![None, Some("c1".to_string()), None]);

        handle.close();
        tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .unwrap();

        assert_eq!(session.cursor(), None);
        let disconnects = kinds(&events)
            .into_iter()
            .filter(|kind| *kind == EventKind::Disconnect)
            .count();
        assert_eq!(disconnects, 2);
        assert!(kinds(&events).contains(&EventKind::Message));
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let rendered = format!("{:?}", GatewayConfig::new("very-secret"));
        assert!(!rendered.contains("very-secret"));
    }
}
