//! Pluggable validation rules

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use super::{IssueKind, ValidationIssue, ValidationResult};
use crate::config::ValidationLimits;
use crate::error::Result;
use crate::registry::MacroTypeRegistry;
use crate::types::WorkflowDefinition;

/// Placeholder device name written when a device could not be resolved
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Config keys that name a physical device
const DEVICE_FIELDS: [&str; 3] = ["deviceName", "inputDevice", "outputDevice"];

/// A named, independent validation check
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn validate(&self, definition: &WorkflowDefinition, registry: &MacroTypeRegistry) -> Result<ValidationResult>;
}

/// Ordered set of rules keyed by name
#[derive(Clone, Default)]
pub struct ValidationRuleRegistry {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl ValidationRuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the device availability and realtime budget rules
    pub fn with_builtins(limits: &ValidationLimits) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MidiDeviceAvailabilityRule));
        registry.register(Arc::new(RealtimeBudgetRule {
            max_midi_nodes: limits.max_realtime_midi_nodes,
        }));
        registry
    }

    /// Add a rule, replacing any rule with the same name
    pub fn register(&mut self, rule: Arc<dyn ValidationRule>) {
        match self.rules.iter().position(|r| r.name() == rule.name()) {
            Some(index) => self.rules[index] = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        before != self.rules.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule. A rule that errors or panics becomes a schema error
    /// and the remaining rules still run.
    pub fn run(&self, definition: &WorkflowDefinition, registry: &MacroTypeRegistry) -> ValidationResult {
        let mut result = ValidationResult::new();
        for rule in &self.rules {
            let failure = match catch_unwind(AssertUnwindSafe(|| rule.validate(definition, registry))) {
                Ok(Ok(rule_result)) => {
                    result.merge(rule_result);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "rule panicked".to_string(),
            };
            log::error!("Validation rule '{}' failed: {}", rule.name(), failure);
            result.error(
                ValidationIssue::new(
                    IssueKind::Schema,
                    format!("Validation rule '{}' failed: {}", rule.name(), failure),
                )
                .with_suggestion("Report this to the author of the rule"),
            );
        }
        result
    }
}

/// Warns when a node still carries the unresolved device placeholder
pub struct MidiDeviceAvailabilityRule;

impl ValidationRule for MidiDeviceAvailabilityRule {
    fn name(&self) -> &str {
        "midi_device_availability"
    }

    fn validate(&self, definition: &WorkflowDefinition, _registry: &MacroTypeRegistry) -> Result<ValidationResult> {
        let mut result = ValidationResult::new();
        for node in &definition.macros {
            for field in DEVICE_FIELDS {
                if node.config.get(field).and_then(Value::as_str) == Some(UNKNOWN_DEVICE) {
                    result.warning(
                        ValidationIssue::new(
                            IssueKind::Dependency,
                            format!("Node '{}' has no MIDI device assigned", node.id),
                        )
                        .with_node(&node.id)
                        .with_field(format!("config.{}", field))
                        .with_suggestion("Connect the device or pick another one in the device settings"),
                    );
                }
            }
        }
        Ok(result)
    }
}

/// Warns when too many MIDI nodes share one workflow
pub struct RealtimeBudgetRule {
    pub max_midi_nodes: usize,
}

impl ValidationRule for RealtimeBudgetRule {
    fn name(&self) -> &str {
        "realtime_budget"
    }

    fn validate(&self, definition: &WorkflowDefinition, _registry: &MacroTypeRegistry) -> Result<ValidationResult> {
        let mut result = ValidationResult::new();
        let midi_nodes = definition
            .macros
            .iter()
            .filter(|n| n.macro_type.contains("midi"))
            .count();
        if midi_nodes > self.max_midi_nodes {
            result.warning(
                ValidationIssue::new(
                    IssueKind::Performance,
                    format!(
                        "{} MIDI nodes may exceed the real-time latency budget (limit {})",
                        midi_nodes, self.max_midi_nodes
                    ),
                )
                .with_field("macros")
                .with_suggestion("Split MIDI processing across several workflows"),
            );
        }
        Ok(result)
    }
}
