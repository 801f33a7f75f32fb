//! Dry-run flow simulation
//!
//! Stands in for real execution: each node "processes" for a short random
//! delay and produces one output per declared output port. Only unknown
//! macro types fail.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::registry::MacroTypeRegistry;
use crate::types::WorkflowDefinition;

const MIN_SIMULATED_MS: u64 = 1;
const MAX_SIMULATED_MS: u64 = 5;

/// Outcome of simulating one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTestResult {
    pub node_id: String,
    pub success: bool,
    pub duration_ms: f64,
    pub outputs_produced: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a dry run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTestResult {
    pub success: bool,
    /// Sum of per-node durations
    pub latency_ms: f64,
    /// Outputs produced per second of wall time
    pub throughput_hz: f64,
    pub errors: Vec<String>,
    pub node_results: Vec<NodeTestResult>,
}

/// Simulate every node of a definition in declared order
pub async fn test_workflow(definition: &WorkflowDefinition, registry: &MacroTypeRegistry) -> FlowTestResult {
    let started = Instant::now();
    let mut node_results = Vec::with_capacity(definition.macros.len());
    let mut errors = Vec::new();

    for node in &definition.macros {
        let node_started = Instant::now();
        let result = match registry.get_definition(&node.macro_type) {
            Some(macro_type) => {
                let delay = rand::rng().random_range(MIN_SIMULATED_MS..=MAX_SIMULATED_MS);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                NodeTestResult {
                    node_id: node.id.clone(),
                    success: true,
                    duration_ms: node_started.elapsed().as_secs_f64() * 1000.0,
                    outputs_produced: macro_type.outputs.len().max(1),
                    error: None,
                }
            }
            None => {
                let error = format!("Unknown macro type '{}' for node '{}'", node.macro_type, node.id);
                errors.push(error.clone());
                NodeTestResult {
                    node_id: node.id.clone(),
                    success: false,
                    duration_ms: node_started.elapsed().as_secs_f64() * 1000.0,
                    outputs_produced: 0,
                    error: Some(error),
                }
            }
        };
        node_results.push(result);
    }

    let latency_ms: f64 = node_results.iter().map(|r| r.duration_ms).sum();
    let outputs: usize = node_results.iter().map(|r| r.outputs_produced).sum();
    let elapsed = started.elapsed().as_secs_f64();

    log::debug!(
        "Dry run of '{}': {} node(s), {:.1}ms simulated",
        definition.id,
        node_results.len(),
        latency_ms
    );

    FlowTestResult {
        success: errors.is_empty(),
        latency_ms,
        throughput_hz: if elapsed > 0.0 { outputs as f64 / elapsed } else { 0.0 },
        errors,
        node_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigSchema, MacroCategory, MacroTypeDefinition, NodeConfig, PortDefinition, PortKind};

    fn registry() -> MacroTypeRegistry {
        let mut registry = MacroTypeRegistry::new();
        registry.register_definition(MacroTypeDefinition {
            id: "splitter".to_string(),
            name: "Splitter".to_string(),
            description: String::new(),
            category: MacroCategory::Utility,
            config_schema: ConfigSchema::default(),
            inputs: vec![],
            outputs: vec![
                PortDefinition::optional("a", "A", PortKind::Any),
                PortDefinition::optional("b", "B", PortKind::Any),
            ],
        });
        registry.register_definition(MacroTypeDefinition {
            id: "sink".to_string(),
            name: "Sink".to_string(),
            description: String::new(),
            category: MacroCategory::Output,
            config_schema: ConfigSchema::default(),
            inputs: vec![],
            outputs: vec![],
        });
        registry
    }

    #[tokio::test]
    async fn test_dry_run_success() {
        let def = WorkflowDefinition::new("wf", "Dry")
            .with_macro(NodeConfig::new("split", "splitter"))
            .with_macro(NodeConfig::new("out", "sink"));

        let result = test_workflow(&def, &registry()).await;
        assert!(result.success);
        assert_eq!(result.node_results.len(), 2);
        assert_eq!(result.node_results[0].outputs_produced, 2);
        assert_eq!(result.node_results[1].outputs_produced, 1);
        assert!(result.latency_ms >= 2.0);
        assert!(result.throughput_hz > 0.0);
    }

    #[tokio::test]
    async fn test_unknown_type_fails_node() {
        let def = WorkflowDefinition::new("wf", "Dry")
            .with_macro(NodeConfig::new("ghost", "nope"))
            .with_macro(NodeConfig::new("out", "sink"));

        let result = test_workflow(&def, &registry()).await;
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.node_results[0].success);
        assert!(result.node_results[1].success);
    }
}
