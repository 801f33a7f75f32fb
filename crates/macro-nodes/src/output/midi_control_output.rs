//! MIDI Control Output
//!
//! Sends incoming numbers as control changes on one controller.

use std::sync::Arc;

use async_trait::async_trait;
use device_resolution::DeviceType;
use macro_engine::{
    ConfigSchema, InputSink, MacroCategory, MacroDescriptor, MacroEngineError, MacroInstance, MacroPorts,
    MacroTypeDefinition, NodeConfig, PortDefinition, PortKind, Result, DEFAULT_PORT,
};

use crate::backend::MidiBackend;
use crate::config::{numeric_value, parse_control, to_data_byte, ControlConfig};
use crate::midi::MidiMessage;

/// Control change sink
///
/// # Config
/// - `deviceName` (required) - output device
/// - `channel` - 1-16, default 1
/// - `cc` - controller number, default 1
///
/// # Inputs
/// - `default` - a number (or `{"value": n}`), rounded and clamped to 0-127
pub struct MidiControlOutput {
    config: ControlConfig,
    ports: MacroPorts,
}

impl MidiControlOutput {
    pub const TYPE_ID: &'static str = "midi_control_output";

    pub fn new(node: &NodeConfig, backend: Arc<dyn MidiBackend>) -> Result<Self> {
        let config = parse_control(node)?;
        if !backend.is_connected(&config.device_name, DeviceType::Output) {
            return Err(MacroEngineError::instantiation(
                &node.id,
                format!("MIDI output '{}' is not connected", config.device_name),
            ));
        }

        let (device, channel, cc) = (config.device_name.clone(), config.channel, config.cc);
        let sink = InputSink::new(move |value| {
            let number = numeric_value(&value)
                .ok_or_else(|| MacroEngineError::forwarding(format!("expected a number, got {}", value)))?;
            let message = MidiMessage::control_change(channel, cc, to_data_byte(number))?;
            backend.send(&device, &message)?;
            Ok(())
        });

        Ok(Self {
            config,
            ports: MacroPorts::new().with_input(DEFAULT_PORT, sink),
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }
}

impl MacroDescriptor for MidiControlOutput {
    fn descriptor() -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: Self::TYPE_ID.to_string(),
            name: "MIDI Control Output".to_string(),
            description: "Sends values as control changes to a MIDI output device".to_string(),
            category: MacroCategory::Output,
            config_schema: ConfigSchema::requiring(&["deviceName"]),
            inputs: vec![PortDefinition::required(
                DEFAULT_PORT,
                "Value",
                PortKind::ControlChange,
            )],
            outputs: vec![],
        }
    }
}

inventory::submit!(macro_engine::DescriptorFn(MidiControlOutput::descriptor));

#[async_trait]
impl MacroInstance for MidiControlOutput {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }
}
