//! Runtime error types.

use thiserror::Error;

use guilder_core::ClientError;

use crate::config::ConfigError;

/// Errors from building or running a client.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
