//! Error types for the persistence substrate

use thiserror::Error;

/// Result type alias using StateError
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while loading or saving state
#[derive(Debug, Error)]
pub enum StateError {
    /// The key cannot be mapped to a storage location
    #[error("Invalid state key: '{0}'")]
    InvalidKey(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
