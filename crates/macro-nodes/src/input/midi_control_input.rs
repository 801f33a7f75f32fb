//! MIDI Control Input
//!
//! Listens to one controller on one channel of an input device and emits
//! its 0-127 value.

use async_trait::async_trait;
use macro_engine::{
    ConfigSchema, MacroCategory, MacroDescriptor, MacroEngineError, MacroInstance, MacroPorts,
    MacroTypeDefinition, NodeConfig, OutputStream, PortDefinition, PortKind, Result, Subscription,
    DEFAULT_PORT,
};
use parking_lot::Mutex;
use serde_json::json;

use crate::backend::MidiBackend;
use crate::config::{parse_control, ControlConfig};
use crate::midi::MidiMessage;

/// Emits the value of every matching control change
///
/// # Config
/// - `deviceName` (required) - input device
/// - `channel` - 1-16, default 1
/// - `cc` - controller number, default 1
///
/// # Outputs
/// - `default` - controller value
pub struct MidiControlInput {
    config: ControlConfig,
    ports: MacroPorts,
    subscription: Mutex<Option<Subscription>>,
}

impl MidiControlInput {
    pub const TYPE_ID: &'static str = "midi_control_input";

    pub fn new(node: &NodeConfig, backend: &dyn MidiBackend) -> Result<Self> {
        let config = parse_control(node)?;
        let source = backend
            .input_stream(&config.device_name)
            .map_err(|e| MacroEngineError::instantiation(&node.id, e.to_string()))?;

        let output = OutputStream::new();
        let emit = output.clone();
        let (channel, cc) = (config.channel, config.cc);
        let subscription = source.subscribe(move |raw| match serde_json::from_value::<MidiMessage>(raw.clone()) {
            Ok(MidiMessage::ControlChange {
                channel: ch,
                controller,
                value,
            }) if ch == channel && controller == cc => emit.emit(json!(value)),
            Ok(_) => {}
            Err(e) => log::warn!("Ignoring malformed MIDI input: {}", e),
        });

        log::debug!(
            "MidiControlInput {}: listening to CC {} on '{}' channel {}",
            node.id,
            cc,
            config.device_name,
            channel
        );

        Ok(Self {
            config,
            ports: MacroPorts::new().with_output(DEFAULT_PORT, output),
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }
}

impl MacroDescriptor for MidiControlInput {
    fn descriptor() -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: Self::TYPE_ID.to_string(),
            name: "MIDI Control Input".to_string(),
            description: "Emits the value of one controller from a MIDI input device".to_string(),
            category: MacroCategory::Input,
            config_schema: ConfigSchema::requiring(&["deviceName"]),
            inputs: vec![],
            outputs: vec![PortDefinition::required(
                DEFAULT_PORT,
                "Value",
                PortKind::ControlChange,
            )],
        }
    }
}

inventory::submit!(macro_engine::DescriptorFn(MidiControlInput::descriptor));

#[async_trait]
impl MacroInstance for MidiControlInput {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }

    async fn destroy(&self) -> Result<()> {
        self.subscription.lock().take();
        Ok(())
    }
}
