//! MIDI Output
//!
//! Sends incoming MIDI messages to an output device, with optional channel
//! rewriting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use device_resolution::DeviceType;
use macro_engine::{
    ConfigSchema, InputSink, MacroCategory, MacroDescriptor, MacroEngineError, MacroInstance, MacroPorts,
    MacroTypeDefinition, NodeConfig, PortDefinition, PortKind, Result, DEFAULT_PORT,
};
use serde::Deserialize;

use crate::backend::MidiBackend;
use crate::config::{parse, parse_port};
use crate::midi::MidiMessage;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMapConfig {
    /// Source channel (as a string key) -> destination channel
    #[serde(default)]
    channel_map: HashMap<String, u8>,
}

/// Raw MIDI sink
///
/// # Config
/// - `deviceName` (required) - output device
/// - `channel` - force every message onto this channel
/// - `channelMap` - per-channel rewrite, e.g. `{"1": 10}`; applied when
///   `channel` is not set
///
/// # Inputs
/// - `default` - serialized `MidiMessage`
pub struct MidiOutput {
    ports: MacroPorts,
}

impl MidiOutput {
    pub const TYPE_ID: &'static str = "midi_output";

    pub fn new(node: &NodeConfig, backend: Arc<dyn MidiBackend>) -> Result<Self> {
        let config = parse_port(node)?;
        let ChannelMapConfig { channel_map } = parse(node)?;
        if let Some((from, to)) = channel_map.iter().find(|(_, to)| !(1..=16).contains(*to)) {
            return Err(MacroEngineError::instantiation(
                &node.id,
                format!("channelMap entry {} -> {} out of range (1-16)", from, to),
            ));
        }
        if !backend.is_connected(&config.device_name, DeviceType::Output) {
            return Err(MacroEngineError::instantiation(
                &node.id,
                format!("MIDI output '{}' is not connected", config.device_name),
            ));
        }

        let device = config.device_name;
        let forced = config.channel;
        let sink = InputSink::new(move |value| {
            let message: MidiMessage = serde_json::from_value(value)?;
            let target = forced.or_else(|| channel_map.get(&message.channel().to_string()).copied());
            let message = match target {
                Some(channel) => message.with_channel(channel),
                None => message,
            };
            backend.send(&device, &message)?;
            Ok(())
        });

        Ok(Self {
            ports: MacroPorts::new().with_input(DEFAULT_PORT, sink),
        })
    }
}

impl MacroDescriptor for MidiOutput {
    fn descriptor() -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: Self::TYPE_ID.to_string(),
            name: "MIDI Output".to_string(),
            description: "Sends MIDI messages to an output device".to_string(),
            category: MacroCategory::Output,
            config_schema: ConfigSchema::requiring(&["deviceName"]),
            inputs: vec![PortDefinition::required(DEFAULT_PORT, "MIDI", PortKind::Midi)],
            outputs: vec![],
        }
    }
}

inventory::submit!(macro_engine::DescriptorFn(MidiOutput::descriptor));

#[async_trait]
impl MacroInstance for MidiOutput {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }
}
