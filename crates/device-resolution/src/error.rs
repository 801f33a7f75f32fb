//! Error types for device resolution

use persistent_state::StateError;
use thiserror::Error;

/// Result type alias using DeviceError
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while resolving logical devices
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No logical assignment exists for the requested purpose
    #[error("No device assigned to logical name '{0}'")]
    NoAssignment(String),

    /// Neither the assignment nor any fallback points at an available device
    #[error("No available device for '{purpose}' (tried: {})", tried.join(", "))]
    DeviceUnavailable { purpose: String, tried: Vec<String> },

    /// Hardware probing failed
    #[error("Device probe failed: {0}")]
    Probe(String),

    /// Persisting the configuration failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StateError),
}
