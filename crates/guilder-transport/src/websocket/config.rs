//! Configuration for the websocket client.

use std::time::Duration;

/// Configuration for a persistent websocket connection.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Websocket URL.
    pub url: String,
    /// Whether to reconnect after the connection drops.
    pub auto_reconnect: bool,
    /// Maximum consecutive failed reconnection attempts (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for the reconnection delay.
    pub max_delay: Duration,
    /// Backoff multiplier applied after each failed attempt.
    pub backoff_multiplier: f64,
    /// Randomise each reconnection delay to between half and all of it.
    pub jitter: bool,
    /// Deadline for a single handshake.
    pub connect_timeout: Duration,
    /// Heartbeat round trips slower than this are logged as warnings.
    pub latency_warning: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auto_reconnect: true,
            max_retries: None,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            connect_timeout: Duration::from_secs(60),
            latency_warning: Duration::from_secs(10),
        }
    }
}

impl WsClientConfig {
    /// Creates a config for the given URL with default retry settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Creates a config that never reconnects.
    pub fn no_reconnect(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: false,
            ..Default::default()
        }
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Sets the initial and maximum reconnection delay.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }
}
