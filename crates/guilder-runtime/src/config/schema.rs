//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use guilder_core::{API_BASE_URL, GATEWAY_URL, USER_AGENT};
use guilder_gateway::DEFAULT_MAX_MESSAGES;
use guilder_transport::{HttpClientConfig, WsClientConfig};

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuilderConfig {
    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GuilderConfig {
    /// Checks values serde cannot reject on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(token) = &self.client.token
            && token.trim().is_empty()
        {
            return Err(ConfigError::validation("client.token must not be blank"));
        }
        if self.gateway.url.is_empty() {
            return Err(ConfigError::missing_field("gateway.url"));
        }
        if self.gateway.backoff_multiplier < 1.0 || !self.gateway.backoff_multiplier.is_finite() {
            return Err(ConfigError::validation(
                "gateway.backoff_multiplier must be a finite number >= 1.0",
            ));
        }
        if self.gateway.initial_delay_ms > self.gateway.max_delay_ms {
            return Err(ConfigError::validation(
                "gateway.initial_delay_ms must not exceed gateway.max_delay_ms",
            ));
        }
        if self.http.base_url.is_empty() {
            return Err(ConfigError::missing_field("http.base_url"));
        }
        if self.http.max_tries == 0 {
            return Err(ConfigError::validation("http.max_tries must be at least 1"));
        }
        if self.logging.output == LogOutput::File && self.logging.file_path.is_none() {
            return Err(ConfigError::missing_field("logging.file_path"));
        }
        Ok(())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Credentials and cache bounds.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Bot token. Usually supplied through `GUILDER_CLIENT__TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Message cache bound; `0` disables the cache.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            token: None,
            max_messages: default_max_messages(),
        }
    }
}

impl ClientSettings {
    /// The cache bound as the gateway expects it.
    pub fn message_cache_limit(&self) -> Option<usize> {
        (self.max_messages > 0).then_some(self.max_messages)
    }
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

// =============================================================================
// Gateway
// =============================================================================

/// Websocket connection and reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Reconnect after the socket drops.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Consecutive failed reconnects before giving up; unset retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomise reconnect delays to between half and all of the schedule.
    #[serde(default = "default_true")]
    pub jitter: bool,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_latency_warning_secs")]
    pub latency_warning_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            auto_reconnect: true,
            max_retries: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            connect_timeout_secs: default_connect_timeout_secs(),
            latency_warning_secs: default_latency_warning_secs(),
        }
    }
}

impl GatewaySettings {
    pub fn to_ws_config(&self) -> WsClientConfig {
        WsClientConfig {
            url: self.url.clone(),
            auto_reconnect: self.auto_reconnect,
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            latency_warning: Duration::from_secs(self.latency_warning_secs),
        }
    }
}

fn default_gateway_url() -> String {
    GATEWAY_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_latency_warning_secs() -> u64 {
    10
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request, including the first.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Overrides the library user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_tries: default_max_tries(),
            user_agent: None,
        }
    }
}

impl HttpSettings {
    pub fn to_http_config(&self, token: Option<String>) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.base_url.clone(),
            token,
            user_agent: self.user_agent().to_string(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_tries: self.max_tries,
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(USER_AGENT)
    }
}

fn default_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tries() -> u32 {
    5
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the log output.
///
/// `json` needs the `json-log` feature and falls back to `full` without it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Target file when `output = "file"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Per-target levels, e.g. `guilder_gateway = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GuilderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.client.message_cache_limit(), Some(DEFAULT_MAX_MESSAGES));
        assert_eq!(config.gateway.url, GATEWAY_URL);
        assert_eq!(config.http.user_agent(), USER_AGENT);
    }

    #[test]
    fn test_zero_disables_message_cache() {
        let settings = ClientSettings {
            max_messages: 0,
            ..Default::default()
        };
        assert_eq!(settings.message_cache_limit(), None);
    }

    #[test]
    fn test_gateway_settings_to_ws_config() {
        let settings = GatewaySettings {
            auto_reconnect: false,
            max_retries: Some(3),
            initial_delay_ms: 250,
            jitter: false,
            ..Default::default()
        };
        let ws = settings.to_ws_config();
        assert!(!ws.auto_reconnect);
        assert!(!ws.jitter);
        assert_eq!(ws.max_retries, Some(3));
        assert_eq!(ws.initial_delay, Duration::from_millis(250));
        assert_eq!(ws.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_http_settings_carry_token() {
        let http = HttpSettings {
            user_agent: Some("custom".into()),
            ..Default::default()
        }
        .to_http_config(Some("secret".into()));
        assert_eq!(http.token.as_deref(), Some("secret"));
        assert_eq!(http.user_agent, "custom");
        assert_eq!(http.max_tries, 5);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = GuilderConfig::default();
        config.gateway.backoff_multiplier = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError { .. })));

        let mut config = GuilderConfig::default();
        config.http.max_tries = 0;
        assert!(config.validate().is_err());

        let mut config = GuilderConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(config.validate(), Err(ConfigError::MissingField { ref field }) if field == "logging.file_path"));

        let mut config = GuilderConfig::default();
        config.client.token = Some("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_redacted_in_debug() {
        let settings = ClientSettings {
            token: Some("very-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("[redacted]"));
    }
}
