//! Layered configuration for the client.
//!
//! Settings come from built-in defaults, `guilder.toml` (or YAML with the
//! `yaml-config` feature) and `GUILDER_*` environment variables, in that
//! order of precedence.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config};
pub use schema::{
    ClientSettings, GatewaySettings, GuilderConfig, HttpSettings, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig,
};
