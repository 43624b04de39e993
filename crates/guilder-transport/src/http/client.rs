//! REST client with the API's retry policy.

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::route::Route;
use guilder_core::{
    API_BASE_URL, ChatMessage, ClientError, ClientResult, HttpError, TransportError, USER_AGENT,
};

/// Response header naming the user the token belongs to.
const AUTHENTICATED_AS: &str = "authenticated-as";

/// Configuration for [`HttpClient`].
#[derive(Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_tries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            token: None,
            user_agent: USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            max_tries: 5,
        }
    }
}

impl HttpClientConfig {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("max_tries", &self.max_tries)
            .finish()
    }
}

/// Delay used when the server gives no better hint: `1 + tries * 2` seconds.
pub fn fallback_delay(tries: u32) -> Duration {
    Duration::from_secs(1 + u64::from(tries) * 2)
}

/// Returns how long to wait before retrying a failed status, or `None` when
/// the status is not retryable.
pub fn retry_delay(status: u16, tries: u32, retry_after: Option<f64>) -> Option<Duration> {
    match status {
        429 => Some(
            retry_after
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .unwrap_or_else(|| fallback_delay(tries)),
        ),
        500 | 502 | 504 | 524 => Some(fallback_delay(tries)),
        _ => None,
    }
}

/// REST client bound to one token.
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    my_id: RwLock<Option<String>>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("my_id", &*self.my_id.read())
            .finish()
    }
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> ClientResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Io(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            my_id: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// The id of the authenticated user, learned from response headers.
    pub fn my_id(&self) -> Option<String> {
        self.my_id.read().clone()
    }

    pub fn set_my_id(&self, id: impl Into<String>) {
        *self.my_id.write() = Some(id.into());
    }

    /// Records the `authenticated-as` header value. `None` and repeats are
    /// ignored.
    fn note_authenticated_as(&self, id: &str) {
        if id.is_empty() || id == "None" {
            return;
        }
        if self.my_id.read().as_deref() == Some(id) {
            return;
        }
        debug!(user_id = %id, "Authenticated user learned from response");
        self.set_my_id(id);
    }

    /// Sends a request and returns the decoded JSON body.
    ///
    /// Empty bodies decode to `Null`, non-JSON bodies to a string.
    pub async fn request(&self, route: &Route, body: Option<&Value>) -> ClientResult<Value> {
        let url = route.url(&self.config.base_url);
        let max_tries = self.config.max_tries.max(1);
        let mut tries = 0u32;

        loop {
            let can_retry = tries + 1 < max_tries;

            let mut request = self.client.request(route.method.clone(), &url);
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(route = %route, tries, authorized = self.config.token.is_some(), "Sending request");

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if can_retry && (e.is_connect() || e.is_request()) => {
                    let delay = fallback_delay(tries);
                    warn!(route = %route, error = %e, delay = ?delay, "Connection failed, retrying");
                    tokio::time::sleep(delay).await;
                    tries += 1;
                    continue;
                }
                Err(e) => {
                    return Err(TransportError::ConnectionFailed {
                        url,
                        reason: e.to_string(),
                    }
                    .into());
                }
            };

            if let Some(id) = response
                .headers()
                .get(AUTHENTICATED_AS)
                .and_then(|v| v.to_str().ok())
            {
                self.note_authenticated_as(id);
            }

            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok());
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;

            debug!(route = %route, status, "Received response");

            if (200..300).contains(&status) {
                return Ok(decode_body(&text));
            }

            let error = HttpError::from_response(status, &text);
            match retry_delay(status, tries, retry_after) {
                Some(delay) if can_retry => {
                    if error.is_rate_limited() {
                        warn!(route = %route, delay = ?delay, "Rate limited, retrying");
                    } else {
                        warn!(route = %route, status, delay = ?delay, "Server error, retrying");
                    }
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                _ => return Err(error.into()),
            }
        }
    }

    /// Posts a plain text message to a channel.
    pub async fn create_channel_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> ClientResult<ChatMessage> {
        let route = Route::post(format!("/channels/{channel_id}/messages"));
        let body = json!({ "content": content });
        let mut response = self.request(&route, Some(&body)).await?;

        match response.get_mut("message").map(Value::take) {
            Some(message) => Ok(serde_json::from_value(message)?),
            None => Err(ClientError::invalid_data(
                "message response without a 'message' field",
            )),
        }
    }
}

fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};

    use super::*;
    use guilder_core::HttpErrorKind;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(base_url: String, max_tries: u32) -> HttpClient {
        HttpClient::new(HttpClientConfig {
            base_url,
            token: Some("secret-token".to_string()),
            max_tries,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_retry_delay_rules() {
        assert_eq!(retry_delay(429, 0, Some(2.5)), Some(Duration::from_millis(2500)));
        assert_eq!(retry_delay(429, 1, None), Some(Duration::from_secs(3)));
        assert_eq!(retry_delay(429, 0, Some(-1.0)), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(429, 0, Some(1e300)), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(429, 2, Some(f64::NAN)), Some(Duration::from_secs(5)));
        assert_eq!(retry_delay(429, 0, Some(f64::INFINITY)), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(524, 2, None), Some(Duration::from_secs(5)));
        assert_eq!(retry_delay(503, 0, None), None);
        assert_eq!(retry_delay(404, 0, Some(1.0)), None);
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(""), Value::Null);
        assert_eq!(decode_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(decode_body("plain"), Value::String("plain".into()));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = HttpClientConfig::with_token("super-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[redacted]"));
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/limited",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            [("Retry-After", "0.3")],
                            r#"{"code":"TooManyRequests","message":"slow down"}"#,
                        )
                            .into_response()
                    } else {
                        (StatusCode::OK, r#"{"ok":true}"#).into_response()
                    }
                }),
            )
            .with_state(Arc::clone(&hits));
        let http = client(serve(app).await, 5);

        let started = std::time::Instant::now();
        let value = http.request(&Route::get("/limited"), None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_fails_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/missing",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, r#"{"message":"no such thing"}"#)
                }),
            )
            .with_state(Arc::clone(&hits));
        let http = client(serve(app).await, 5);

        let err = http.request(&Route::get("/missing"), None).await.unwrap_err();
        match err {
            ClientError::Http(e) => {
                assert_eq!(e.kind, HttpErrorKind::NotFound);
                assert_eq!(e.code, "UnknownCode");
                assert_eq!(e.message, "no such thing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_exhausts_tries() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/flaky",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }),
            )
            .with_state(Arc::clone(&hits));
        let http = client(serve(app).await, 2);

        let err = http.request(&Route::get("/flaky"), None).await.unwrap_err();
        assert_eq!(err.http_kind(), Some(HttpErrorKind::ServerError));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_message_and_authenticated_as() {
        let app = Router::new().route(
            "/channels/{channel_id}/messages",
            post(
                |Path(channel_id): Path<String>, headers: HeaderMap, body: String| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer secret-token");
                    if !authorized {
                        return StatusCode::FORBIDDEN.into_response();
                    }
                    let sent: Value = serde_json::from_str(&body).unwrap();
                    let response = json!({
                        "message": {
                            "id": "m1",
                            "channelId": channel_id,
                            "content": sent["content"],
                            "createdBy": "bot-1",
                            "createdAt": "2024-01-01T00:00:00Z",
                        }
                    });
                    (
                        StatusCode::CREATED,
                        [("authenticated-as", "bot-1")],
                        response.to_string(),
                    )
                        .into_response()
                },
            ),
        );
        let http = client(serve(app).await, 1);

        let message = http.create_channel_message("c1", "pong").await.unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.channel_id, "c1");
        assert_eq!(message.text(), "pong");
        assert_eq!(http.my_id().as_deref(), Some("bot-1"));
    }

    #[test]
    fn test_authenticated_as_ignores_none() {
        let http = client("http://localhost".to_string(), 1);

        http.note_authenticated_as("None");
        assert_eq!(http.my_id(), None);

        http.note_authenticated_as("bot-1");
        http.note_authenticated_as("None");
        http.note_authenticated_as("");
        assert_eq!(http.my_id().as_deref(), Some("bot-1"));
    }
}
