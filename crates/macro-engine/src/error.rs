//! Error types for the macro engine

use persistent_state::StateError;
use thiserror::Error;

use crate::validation::ValidationResult;

/// Result type alias using MacroEngineError
pub type Result<T> = std::result::Result<T, MacroEngineError>;

/// Errors that can occur in the macro engine
#[derive(Debug, Error)]
pub enum MacroEngineError {
    /// A definition failed validation; carries every error and warning
    #[error("Workflow validation failed: {}", .0.summary())]
    Validation(ValidationResult),

    /// Unknown workflow id
    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// Unknown template id
    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    /// Create with an id that is already stored
    #[error("Workflow '{0}' already exists")]
    DuplicateId(String),

    /// A connection referenced a port the node does not expose
    #[error("Port '{port}' not found on node '{node_id}'")]
    PortNotFound { node_id: String, port: String },

    /// No registry entry for a macro type
    #[error("Unknown macro type '{0}'")]
    UnknownMacroType(String),

    /// A macro instance could not be built
    #[error("Failed to instantiate node '{node_id}': {message}")]
    Instantiation { node_id: String, message: String },

    /// A template rejected its configuration
    #[error("Template expansion failed: {0}")]
    TemplateExpansion(String),

    /// A value pushed into an input was rejected
    #[error("Forwarding failed: {0}")]
    Forwarding(String),

    /// The connection manager no longer accepts work
    #[error("Connection manager has been destroyed")]
    ManagerDestroyed,

    /// Loading or saving state failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] StateError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MacroEngineError {
    /// Create an instantiation error for a node
    pub fn instantiation(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Instantiation {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Create a forwarding error with a message
    pub fn forwarding(msg: impl Into<String>) -> Self {
        Self::Forwarding(msg.into())
    }
}
