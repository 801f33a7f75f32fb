//! MIDI Input
//!
//! Forwards every message from an input device, optionally restricted to
//! one channel.

use async_trait::async_trait;
use macro_engine::{
    ConfigSchema, MacroCategory, MacroDescriptor, MacroEngineError, MacroInstance, MacroPorts,
    MacroTypeDefinition, NodeConfig, OutputStream, PortDefinition, PortKind, Result, Subscription,
    DEFAULT_PORT,
};
use parking_lot::Mutex;

use crate::backend::MidiBackend;
use crate::config::{parse_port, PortConfig};
use crate::midi::MidiMessage;

/// Raw MIDI source
///
/// # Config
/// - `deviceName` (required) - input device
/// - `channel` - only forward this channel
///
/// # Outputs
/// - `default` - serialized `MidiMessage`
pub struct MidiInput {
    config: PortConfig,
    ports: MacroPorts,
    subscription: Mutex<Option<Subscription>>,
}

impl MidiInput {
    pub const TYPE_ID: &'static str = "midi_input";

    pub fn new(node: &NodeConfig, backend: &dyn MidiBackend) -> Result<Self> {
        let config = parse_port(node)?;
        let source = backend
            .input_stream(&config.device_name)
            .map_err(|e| MacroEngineError::instantiation(&node.id, e.to_string()))?;

        let output = OutputStream::new();
        let emit = output.clone();
        let channel = config.channel;
        let subscription = source.subscribe(move |raw| {
            let Ok(message) = serde_json::from_value::<MidiMessage>(raw.clone()) else {
                log::warn!("Ignoring malformed MIDI input");
                return;
            };
            if channel.map_or(true, |ch| ch == message.channel()) {
                emit.emit(raw.clone());
            }
        });

        Ok(Self {
            config,
            ports: MacroPorts::new().with_output(DEFAULT_PORT, output),
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }
}

impl MacroDescriptor for MidiInput {
    fn descriptor() -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: Self::TYPE_ID.to_string(),
            name: "MIDI Input".to_string(),
            description: "Forwards every message from a MIDI input device".to_string(),
            category: MacroCategory::Input,
            config_schema: ConfigSchema::requiring(&["deviceName"]),
            inputs: vec![],
            outputs: vec![PortDefinition::required(DEFAULT_PORT, "MIDI", PortKind::Midi)],
        }
    }
}

inventory::submit!(macro_engine::DescriptorFn(MidiInput::descriptor));

#[async_trait]
impl MacroInstance for MidiInput {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }

    async fn destroy(&self) -> Result<()> {
        self.subscription.lock().take();
        Ok(())
    }
}
