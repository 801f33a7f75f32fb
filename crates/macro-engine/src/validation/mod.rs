//! Workflow validation
//!
//! `validate_workflow` runs, in order:
//!
//! 1. schema checks on the definition itself
//! 2. per-node checks against the macro type registry
//! 3. connection analysis (`validate_connections`)
//! 4. aggregate size warnings
//! 5. custom rules from a `ValidationRuleRegistry`
//!
//! Every issue carries a human-readable suggestion for display in an
//! editor. Only errors make a result invalid.

mod connections;
mod rules;
mod simulation;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use connections::{validate_connections, ConnectionValidationResult, PerformanceIssue, Severity};
pub use rules::{
    MidiDeviceAvailabilityRule, RealtimeBudgetRule, ValidationRule, ValidationRuleRegistry,
    UNKNOWN_DEVICE,
};
pub use simulation::{test_workflow, FlowTestResult, NodeTestResult};

use crate::config::ValidationLimits;
use crate::registry::MacroTypeRegistry;
use crate::types::WorkflowDefinition;

/// What part of a workflow an issue is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Schema,
    Connection,
    Dependency,
    Performance,
    BestPractice,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            node_id: None,
            connection_id: None,
            suggestion: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Aggregate outcome of validating a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
        self.valid = false;
    }

    pub fn warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
    }

    /// Error messages joined for display
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            return "no errors".to_string();
        }
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a definition with default limits and the built-in rules
pub fn validate_workflow(definition: &WorkflowDefinition, registry: &MacroTypeRegistry) -> ValidationResult {
    let limits = ValidationLimits::default();
    let rules = ValidationRuleRegistry::with_builtins(&limits);
    run_validation(definition, registry, &limits, &rules)
}

/// Validator bound to a registry, limits and a custom rule set
pub struct WorkflowValidator {
    registry: Arc<MacroTypeRegistry>,
    limits: ValidationLimits,
    rules: RwLock<ValidationRuleRegistry>,
}

impl WorkflowValidator {
    pub fn new(registry: Arc<MacroTypeRegistry>, limits: ValidationLimits) -> Self {
        let rules = ValidationRuleRegistry::with_builtins(&limits);
        Self {
            registry,
            limits,
            rules: RwLock::new(rules),
        }
    }

    pub fn registry(&self) -> &MacroTypeRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Add or replace a custom rule
    pub fn register_rule(&self, rule: Arc<dyn ValidationRule>) {
        self.rules.write().register(rule);
    }

    /// Remove a custom rule by name
    pub fn unregister_rule(&self, name: &str) -> bool {
        self.rules.write().unregister(name)
    }

    pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationResult {
        let rules = self.rules.read().clone();
        run_validation(definition, &self.registry, &self.limits, &rules)
    }

    /// Validate a raw JSON document: shape first, then the typed checks
    pub fn validate_value(&self, document: &Value) -> ValidationResult {
        let mut result = check_document_shape(document);
        if !result.valid {
            return result;
        }

        match serde_json::from_value::<WorkflowDefinition>(document.clone()) {
            Ok(definition) => result.merge(self.validate(&definition)),
            Err(e) => result.error(
                ValidationIssue::new(IssueKind::Schema, format!("Malformed workflow: {}", e))
                    .with_suggestion("Check field names and value types against the workflow format"),
            ),
        }
        result
    }

    pub fn validate_connections(&self, definition: &WorkflowDefinition) -> ConnectionValidationResult {
        validate_connections(definition, &self.limits)
    }

    pub async fn test_workflow(&self, definition: &WorkflowDefinition) -> FlowTestResult {
        test_workflow(definition, &self.registry).await
    }
}

fn run_validation(
    definition: &WorkflowDefinition,
    registry: &MacroTypeRegistry,
    limits: &ValidationLimits,
    rules: &ValidationRuleRegistry,
) -> ValidationResult {
    let mut result = ValidationResult::new();

    check_schema(definition, &mut result);
    check_nodes(definition, registry, &mut result);

    let connections = validate_connections(definition, limits);
    for issue in connections.errors {
        result.error(issue);
    }
    for issue in connections.warnings {
        result.warning(issue);
    }

    check_aggregates(definition, limits, &mut result);
    result.merge(rules.run(definition, registry));

    if !result.valid {
        log::debug!(
            "Workflow '{}' failed validation with {} error(s)",
            definition.id,
            result.errors.len()
        );
    }
    result
}

fn check_schema(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    if definition.id.trim().is_empty() {
        result.error(
            ValidationIssue::new(IssueKind::Schema, "Workflow id is required")
                .with_field("id")
                .with_suggestion("Give the workflow a unique, non-empty id"),
        );
    }
    if definition.name.trim().is_empty() {
        result.error(
            ValidationIssue::new(IssueKind::Schema, "Workflow name is required")
                .with_field("name")
                .with_suggestion("Give the workflow a descriptive name"),
        );
    }
    if definition.version == 0 {
        result.error(
            ValidationIssue::new(IssueKind::Schema, "Workflow version must be a positive integer")
                .with_field("version")
                .with_suggestion("Start versions at 1"),
        );
    }
}

fn check_nodes(definition: &WorkflowDefinition, registry: &MacroTypeRegistry, result: &mut ValidationResult) {
    let mut seen: HashSet<&str> = HashSet::new();

    for node in &definition.macros {
        if !seen.insert(node.id.as_str()) {
            result.error(
                ValidationIssue::new(IssueKind::Schema, format!("Duplicate node id '{}'", node.id))
                    .with_node(&node.id)
                    .with_field("id")
                    .with_suggestion("Node ids must be unique within a workflow"),
            );
        }

        let Some(macro_type) = registry.get_definition(&node.macro_type) else {
            result.error(
                ValidationIssue::new(
                    IssueKind::Dependency,
                    format!("Unknown macro type '{}' for node '{}'", node.macro_type, node.id),
                )
                .with_node(&node.id)
                .with_field("type")
                .with_suggestion("Use a registered macro type or install the module providing it"),
            );
            continue;
        };

        for field in &macro_type.config_schema.required {
            if node.config.get(field).map_or(true, Value::is_null) {
                result.error(
                    ValidationIssue::new(
                        IssueKind::Schema,
                        format!("Node '{}' is missing required config field '{}'", node.id, field),
                    )
                    .with_node(&node.id)
                    .with_field(format!("config.{}", field))
                    .with_suggestion(format!("Set '{}' in the node configuration", field)),
                );
            }
        }

        match node.position {
            None => result.error(
                ValidationIssue::new(IssueKind::Schema, format!("Node '{}' has no position", node.id))
                    .with_node(&node.id)
                    .with_field("position")
                    .with_suggestion("Set numeric x and y coordinates"),
            ),
            Some(position) if !position.is_finite() => result.error(
                ValidationIssue::new(
                    IssueKind::Schema,
                    format!("Node '{}' has a non-numeric position", node.id),
                )
                .with_node(&node.id)
                .with_field("position")
                .with_suggestion("Set finite numeric x and y coordinates"),
            ),
            Some(_) => {}
        }
    }
}

fn check_aggregates(definition: &WorkflowDefinition, limits: &ValidationLimits, result: &mut ValidationResult) {
    if definition.macros.len() > limits.max_nodes {
        result.warning(
            ValidationIssue::new(
                IssueKind::Performance,
                format!(
                    "Workflow has {} nodes (more than {})",
                    definition.macros.len(),
                    limits.max_nodes
                ),
            )
            .with_field("macros")
            .with_suggestion("Split large workflows into smaller ones"),
        );
    }
    if definition.connections.len() > limits.max_connections {
        result.warning(
            ValidationIssue::new(
                IssueKind::Performance,
                format!(
                    "Workflow has {} connections (more than {})",
                    definition.connections.len(),
                    limits.max_connections
                ),
            )
            .with_field("connections")
            .with_suggestion("Reduce wiring or split the workflow"),
        );
    }

    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for conn in &definition.connections {
        *incoming.entry(conn.target_node_id.as_str()).or_default() += 1;
    }
    for node in &definition.macros {
        let count = incoming.get(node.id.as_str()).copied().unwrap_or(0);
        if count > limits.max_incoming {
            result.warning(
                ValidationIssue::new(
                    IssueKind::Performance,
                    format!(
                        "Node '{}' has {} incoming connections and may become a bottleneck",
                        node.id, count
                    ),
                )
                .with_node(&node.id)
                .with_suggestion("Merge inputs upstream before they reach this node"),
            );
        }
    }
}

/// Structural checks on a raw document before it is deserialized
fn check_document_shape(document: &Value) -> ValidationResult {
    let mut result = ValidationResult::new();
    let Some(object) = document.as_object() else {
        result.error(
            ValidationIssue::new(IssueKind::Schema, "Workflow must be a JSON object")
                .with_suggestion("Provide the workflow as an object"),
        );
        return result;
    };

    for field in ["id", "name"] {
        match object.get(field).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => {}
            _ => result.error(
                ValidationIssue::new(IssueKind::Schema, format!("Field '{}' must be a non-empty string", field))
                    .with_field(field)
                    .with_suggestion(format!("Set '{}' to a non-empty string", field)),
            ),
        }
    }

    for field in ["macros", "connections"] {
        if !object.get(field).is_some_and(Value::is_array) {
            result.error(
                ValidationIssue::new(IssueKind::Schema, format!("Field '{}' must be an array", field))
                    .with_field(field)
                    .with_suggestion(format!("Set '{}' to a list (it may be empty)", field)),
            );
        }
    }

    if !object.get("version").and_then(Value::as_u64).is_some_and(|v| v >= 1) {
        result.error(
            ValidationIssue::new(IssueKind::Schema, "Field 'version' must be a positive integer")
                .with_field("version")
                .with_suggestion("Start versions at 1"),
        );
    }

    if let Some(macros) = object.get("macros").and_then(Value::as_array) {
        for (index, node) in macros.iter().enumerate() {
            let node_id = node
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));
            let numeric = |axis: &str| {
                node.get("position")
                    .and_then(|p| p.get(axis))
                    .is_some_and(Value::is_number)
            };
            if !numeric("x") || !numeric("y") {
                result.error(
                    ValidationIssue::new(
                        IssueKind::Schema,
                        format!("Node '{}' needs a numeric position", node_id),
                    )
                    .with_node(node_id)
                    .with_field(format!("macros[{}].position", index))
                    .with_suggestion("Set position to {\"x\": <number>, \"y\": <number>}"),
                );
            }
        }
    }

    result
}
