//! Workflow definition and macro type data model
//!
//! Everything here serializes as camelCase JSON so that stored documents
//! and editor payloads share one shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Port name used when a connection does not name one
pub const DEFAULT_PORT: &str = "default";

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_version() -> u64 {
    1
}

/// A versioned, user-authored workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique id, immutable after creation
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Incremented by one on every successful update
    #[serde(default = "default_version")]
    pub version: u64,
    /// Epoch milliseconds
    #[serde(default)]
    pub created: i64,
    /// Epoch milliseconds, refreshed on every mutation
    #[serde(default)]
    pub modified: i64,
    #[serde(default)]
    pub macros: Vec<NodeConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl WorkflowDefinition {
    /// Create an enabled, empty definition at version 1
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            version: 1,
            created: 0,
            modified: 0,
            macros: Vec::new(),
            connections: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_macro(mut self, node: NodeConfig) -> Self {
        self.macros.push(node);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connections.push(connection);
        self
    }

    /// Find a node by id
    pub fn node(&self, node_id: &str) -> Option<&NodeConfig> {
        self.macros.iter().find(|n| n.id == node_id)
    }
}

/// Layout position of a node in the editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One graph vertex: a macro of some registered type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Unique within the definition
    pub id: String,
    /// Macro type id, looked up in the registry
    #[serde(rename = "type")]
    pub macro_type: String,
    /// Required for schema validity even though it is presentational
    #[serde(default)]
    pub position: Option<Position>,
    /// Type-specific configuration
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl NodeConfig {
    /// Create a node at the origin with an empty config object
    pub fn new(id: impl Into<String>, macro_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            macro_type: macro_type.into(),
            position: Some(Position::default()),
            config: Value::Object(Map::new()),
            name: None,
            enabled: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position::new(x, y));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Nodes are enabled unless explicitly switched off
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Read a config field
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

/// One graph edge between two node ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique within the definition
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default = "default_port")]
    pub source_output: String,
    #[serde(default = "default_port")]
    pub target_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ConnectionConfig {
    /// Connect the default ports of two nodes
    pub fn new(
        id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source_node_id.into(),
            target_node_id: target_node_id.into(),
            source_output: default_port(),
            target_input: default_port(),
            enabled: None,
        }
    }

    pub fn with_ports(mut self, source_output: impl Into<String>, target_input: impl Into<String>) -> Self {
        self.source_output = source_output.into();
        self.target_input = target_input.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_node_id == self.target_node_id
    }
}

/// Category for palette grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroCategory {
    Input,
    Output,
    Processor,
    Utility,
}

/// Kind of data flowing through a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Raw MIDI messages
    Midi,
    /// Control change values
    ControlChange,
    /// Plain numbers
    Number,
    /// Anything
    Any,
}

/// A named, typed input or output slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    pub id: String,
    pub name: String,
    pub kind: PortKind,
    pub required: bool,
}

impl PortDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: PortKind, required: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            required,
        }
    }

    pub fn required(id: impl Into<String>, name: impl Into<String>, kind: PortKind) -> Self {
        Self::new(id, name, kind, true)
    }

    pub fn optional(id: impl Into<String>, name: impl Into<String>, kind: PortKind) -> Self {
        Self::new(id, name, kind, false)
    }
}

/// Minimal config schema: the top-level fields a node must set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSchema {
    #[serde(default)]
    pub required: Vec<String>,
}

impl ConfigSchema {
    pub fn requiring(fields: &[&str]) -> Self {
        Self {
            required: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Registry entry describing one macro type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroTypeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: MacroCategory,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
}

/// Implemented by macros that can describe their own type
pub trait MacroDescriptor {
    fn descriptor() -> MacroTypeDefinition
    where
        Self: Sized;
}

/// Lifecycle status of a running workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Initializing,
    Running,
    Error,
    Destroyed,
}

impl InstanceStatus {
    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Initializing, Running) | (Initializing, Error) | (Running, Error) => true,
            _ => false,
        }
    }
}

/// One side of a live connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub node_id: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(node_id: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            port: port.into(),
        }
    }
}

/// Snapshot of a live wiring between two ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHandle {
    pub id: String,
    pub source: Endpoint,
    pub target: Endpoint,
    /// Epoch milliseconds
    pub created: i64,
    /// Epoch milliseconds of the last forwarded event
    pub last_data_flow: Option<i64>,
}
