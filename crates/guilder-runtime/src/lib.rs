//! # guilder runtime
//!
//! Ties the lower layers into a running bot:
//!
//! - [`Client`] / [`ClientHandle`]: credentials, REST core, gateway
//!   connection, handler registry and lifecycle (`start`, `run`, `close`)
//! - [`config`]: layered figment configuration ([`GuilderConfig`])
//! - [`logging`]: `tracing-subscriber` setup driven by that configuration
//!
//! ```rust,ignore
//! use guilder_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     init_from_config(&config.logging);
//!
//!     let client = Client::builder()
//!         .config(config)
//!         .matcher(on_ready().handler(|| async { info!("ready") }))
//!         .build()?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;

pub use client::{Client, ClientBuilder, ClientHandle, Credentials};
pub use config::{ConfigError, ConfigLoader, ConfigResult, GuilderConfig, Profile, load_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};

pub use tracing;
pub use tracing_subscriber;

/// Common imports for bot binaries.
pub mod prelude {
    pub use crate::client::{Client, ClientBuilder, ClientHandle};
    pub use crate::config::{ConfigLoader, GuilderConfig, load_config};
    pub use crate::logging::{LoggingBuilder, init_from_config};

    pub use tracing::{debug, error, info, trace, warn};
}
