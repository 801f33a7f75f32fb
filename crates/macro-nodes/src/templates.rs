//! Built-in workflow templates
//!
//! Both templates take logical device, channel and controller names and
//! resolve them through the device layer before generating nodes.

use std::sync::Arc;

use async_trait::async_trait;
use device_resolution::{DeviceResolver, LogicalTemplateConfig, PhysicalTemplateConfig};
use macro_engine::validation::UNKNOWN_DEVICE;
use macro_engine::{
    ConnectionConfig, MacroEngineError, NodeConfig, Result, WorkflowDefinition, WorkflowTemplate,
};
use serde_json::{json, Value};

use crate::input::{MidiControlInput, MidiInput};
use crate::output::{MidiControlOutput, MidiOutput};
use crate::processing::ValueMapper;

pub const MIDI_CC_CHAIN: &str = "midi_cc_chain";
pub const MIDI_THRU: &str = "midi_thru";

const INPUT_NODE: &str = "input";
const PROCESSOR_NODE: &str = "processor";
const OUTPUT_NODE: &str = "output";

/// Both built-in templates bound to one resolver
pub fn builtin_templates(resolver: Arc<DeviceResolver>) -> Vec<Arc<dyn WorkflowTemplate>> {
    vec![
        Arc::new(MidiCcChainTemplate::new(resolver.clone())),
        Arc::new(MidiThruTemplate::new(resolver)),
    ]
}

fn resolve(resolver: &DeviceResolver, config: &Value) -> Result<PhysicalTemplateConfig> {
    let logical: LogicalTemplateConfig = serde_json::from_value(config.clone())
        .map_err(|e| MacroEngineError::TemplateExpansion(format!("invalid template config: {}", e)))?;
    Ok(resolver.resolve_logical_template(&logical))
}

/// Workflow id, name and description from `workflowId` / `workflowName` /
/// `description`, with generated fallbacks
fn base_definition(template_id: &str, default_name: &str, physical: &PhysicalTemplateConfig) -> WorkflowDefinition {
    let text = |key: &str| physical.extra.get(key).and_then(Value::as_str).map(str::to_string);
    let id = text("workflowId").unwrap_or_else(|| format!("{}_{}", template_id, uuid::Uuid::new_v4()));
    let name = text("workflowName").unwrap_or_else(|| default_name.to_string());

    let mut definition = WorkflowDefinition::new(id, name);
    definition.description = text("description");
    definition.metadata = Some(
        [("template".to_string(), json!(template_id))]
            .into_iter()
            .collect(),
    );
    definition
}

fn device_or_unknown(device: &Option<String>) -> String {
    device.clone().unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
}

/// Input controller to output controller, with an optional range remap
///
/// Config: `inputDevice`, `inputChannel`, `inputCC`, `outputDevice`,
/// `outputChannel`, `outputCC`, optional `minValue` / `maxValue`. A
/// `processor` node is added iff either bound is given.
pub struct MidiCcChainTemplate {
    resolver: Arc<DeviceResolver>,
}

impl MidiCcChainTemplate {
    pub fn new(resolver: Arc<DeviceResolver>) -> Self {
        Self { resolver }
    }

    fn build(&self, physical: &PhysicalTemplateConfig) -> Result<WorkflowDefinition> {
        let mapped = physical.min_value.is_some() || physical.max_value.is_some();
        let (min, max) = (physical.min_value.unwrap_or(0), physical.max_value.unwrap_or(127));
        if mapped && (!(0..=127).contains(&min) || !(0..=127).contains(&max) || min > max) {
            return Err(MacroEngineError::TemplateExpansion(format!(
                "value range [{}, {}] must lie within 0-127 with min <= max",
                min, max
            )));
        }

        let mut definition = base_definition(MIDI_CC_CHAIN, "MIDI CC Chain", physical).with_macro(
            NodeConfig::new(INPUT_NODE, MidiControlInput::TYPE_ID)
                .at(100.0, 100.0)
                .with_config(json!({
                    "deviceName": device_or_unknown(&physical.input_device),
                    "channel": physical.input_channel.unwrap_or(1),
                    "cc": physical.input_cc.unwrap_or(1),
                })),
        );

        if mapped {
            definition = definition
                .with_macro(
                    NodeConfig::new(PROCESSOR_NODE, ValueMapper::TYPE_ID)
                        .at(300.0, 100.0)
                        .with_config(json!({
                            "inputRange": [0, 127],
                            "outputRange": [min, max],
                        })),
                )
                .with_connection(ConnectionConfig::new("input-to-processor", INPUT_NODE, PROCESSOR_NODE))
                .with_connection(ConnectionConfig::new("processor-to-output", PROCESSOR_NODE, OUTPUT_NODE));
        } else {
            definition = definition.with_connection(ConnectionConfig::new("input-to-output", INPUT_NODE, OUTPUT_NODE));
        }

        Ok(definition.with_macro(
            NodeConfig::new(OUTPUT_NODE, MidiControlOutput::TYPE_ID)
                .at(500.0, 100.0)
                .with_config(json!({
                    "deviceName": device_or_unknown(&physical.output_device),
                    "channel": physical.output_channel.unwrap_or(1),
                    "cc": physical.output_cc.unwrap_or(1),
                })),
        ))
    }
}

#[async_trait]
impl WorkflowTemplate for MidiCcChainTemplate {
    fn id(&self) -> &str {
        MIDI_CC_CHAIN
    }

    fn name(&self) -> &str {
        "MIDI CC Chain"
    }

    fn description(&self) -> &str {
        "Routes one controller to another, optionally rescaling its range"
    }

    async fn generate(&self, config: &Value) -> Result<WorkflowDefinition> {
        let physical = resolve(&self.resolver, config)?;
        self.build(&physical)
    }
}

/// Everything from one device straight to another
///
/// Config: `inputDevice`, `outputDevice`, optional `channelMap`.
pub struct MidiThruTemplate {
    resolver: Arc<DeviceResolver>,
}

impl MidiThruTemplate {
    pub fn new(resolver: Arc<DeviceResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl WorkflowTemplate for MidiThruTemplate {
    fn id(&self) -> &str {
        MIDI_THRU
    }

    fn name(&self) -> &str {
        "MIDI Thru"
    }

    fn description(&self) -> &str {
        "Passes every message from an input device to an output device"
    }

    async fn generate(&self, config: &Value) -> Result<WorkflowDefinition> {
        let physical = resolve(&self.resolver, config)?;

        let mut output_config = json!({"deviceName": device_or_unknown(&physical.output_device)});
        if let Some(channel_map) = &physical.channel_map {
            output_config["channelMap"] = channel_map.clone();
        }

        Ok(base_definition(MIDI_THRU, "MIDI Thru", &physical)
            .with_macro(
                NodeConfig::new(INPUT_NODE, MidiInput::TYPE_ID)
                    .at(100.0, 100.0)
                    .with_config(json!({"deviceName": device_or_unknown(&physical.input_device)})),
            )
            .with_macro(
                NodeConfig::new(OUTPUT_NODE, MidiOutput::TYPE_ID)
                    .at(300.0, 100.0)
                    .with_config(output_config),
            )
            .with_connection(ConnectionConfig::new("thru", INPUT_NODE, OUTPUT_NODE)))
    }
}
