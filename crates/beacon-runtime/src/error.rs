//! Error types for runtime operations.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid runtime address: {0}")]
    InvalidAddress(String),

    #[error("failed to reach runtime: {0}")]
    Connect(String),

    #[error("runtime returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("failed to decode runtime response: {0}")]
    Decode(String),

    #[error("could not find container with id {0}")]
    ContainerNotFound(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}
