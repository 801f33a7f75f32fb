//! Macro Engine - reactive workflow graphs for MIDI macros
//!
//! A workflow is a user-authored graph of macro nodes (MIDI inputs,
//! processors, outputs) wired together by connections. This crate owns the
//! whole lifecycle:
//!
//! - `WorkflowManager`: create, update, enable, reload and delete workflows,
//!   with persistence and hot reload of running instances
//! - `WorkflowValidator`: schema, dependency, graph and performance checks
//!   plus pluggable rules
//! - `ConnectionManager`: throttled, fault-isolated value forwarding between
//!   node ports, with health and metrics
//! - `MacroTypeRegistry`: the catalog of macro types and their factories
//!
//! # Example
//!
//! ```ignore
//! use macro_engine::{EngineConfig, MacroTypeRegistry, WorkflowManager};
//! use persistent_state::JsonFileBackend;
//!
//! let registry = Arc::new(MacroTypeRegistry::with_builtins());
//! let backend = Arc::new(JsonFileBackend::new(".macro-host/state"));
//! let manager = WorkflowManager::new(registry, backend, EngineConfig::default());
//! manager.initialize().await;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod instance;
pub mod manager;
pub mod node;
pub mod registry;
pub mod stream;
pub mod templates;
pub mod types;
pub mod validation;

pub use config::{ConnectionSettings, EngineConfig, ValidationLimits, DEFAULT_PERSISTENCE_KEY};
pub use connection::{ConnectionHealth, ConnectionManager, ConnectionMetrics};
pub use error::{MacroEngineError, Result};
pub use events::{EventBus, EventError, EventHandler, VecEventSink, WorkflowEvent, WorkflowEventType};
pub use instance::{scoped_connection_id, InstanceMetrics, InstanceSnapshot};
pub use manager::{ReloadSummary, WorkflowManager};
pub use node::{FnMacroFactory, MacroFactory, MacroInstance, MacroNode, MacroPorts, PassthroughMacro};
pub use registry::{DescriptorFn, MacroTypeRegistry};
pub use stream::{InputSink, OutputStream, Subscription};
pub use templates::{TemplateInfo, TemplateRegistry, WorkflowTemplate};
pub use types::{
    now_ms, ConfigSchema, ConnectionConfig, ConnectionHandle, Endpoint, InstanceStatus, MacroCategory,
    MacroDescriptor, MacroTypeDefinition, NodeConfig, PortDefinition, PortKind, Position, WorkflowDefinition,
    DEFAULT_PORT,
};
pub use validation::{
    validate_workflow, ConnectionValidationResult, FlowTestResult, IssueKind, ValidationIssue, ValidationResult,
    ValidationRule, WorkflowValidator,
};
