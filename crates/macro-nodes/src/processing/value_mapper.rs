//! Value Mapper
//!
//! Linearly rescales numbers from one range to another.

use async_trait::async_trait;
use macro_engine::{
    ConfigSchema, InputSink, MacroCategory, MacroDescriptor, MacroEngineError, MacroInstance, MacroPorts,
    MacroTypeDefinition, NodeConfig, OutputStream, PortDefinition, PortKind, Result, DEFAULT_PORT,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{numeric_value, parse};

fn midi_range() -> [f64; 2] {
    [0.0, 127.0]
}

/// Configuration for the value mapper
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMapperConfig {
    #[serde(default = "midi_range")]
    pub input_range: [f64; 2],
    #[serde(default = "midi_range")]
    pub output_range: [f64; 2],
}

impl Default for ValueMapperConfig {
    fn default() -> Self {
        Self {
            input_range: midi_range(),
            output_range: midi_range(),
        }
    }
}

impl ValueMapperConfig {
    /// Rescale, round to the nearest integer, clamp to the output range
    pub fn map(&self, value: f64) -> i64 {
        let [in_min, in_max] = self.input_range;
        let [out_min, out_max] = self.output_range;

        let scaled = if in_max == in_min {
            out_min
        } else {
            out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min)
        };
        let (low, high) = if out_min <= out_max {
            (out_min, out_max)
        } else {
            (out_max, out_min)
        };
        scaled.round().clamp(low.round(), high.round()) as i64
    }
}

/// Range remapping processor
///
/// # Config
/// - `inputRange` - `[min, max]`, default `[0, 127]`
/// - `outputRange` - `[min, max]`, default `[0, 127]`
///
/// # Inputs
/// - `default` - a number or `{"value": n}`
///
/// # Outputs
/// - `default` - the mapped integer
pub struct ValueMapper {
    config: ValueMapperConfig,
    ports: MacroPorts,
}

impl ValueMapper {
    pub const TYPE_ID: &'static str = "value_mapper";

    pub fn new(node: &NodeConfig) -> Result<Self> {
        let config: ValueMapperConfig = parse(node)?;
        if config.input_range.iter().chain(&config.output_range).any(|v| !v.is_finite()) {
            return Err(MacroEngineError::instantiation(&node.id, "ranges must be finite numbers"));
        }
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: ValueMapperConfig) -> Self {
        let output = OutputStream::new();
        let emit = output.clone();
        let sink = InputSink::new(move |value| {
            let number = numeric_value(&value)
                .ok_or_else(|| MacroEngineError::forwarding(format!("expected a number, got {}", value)))?;
            emit.emit(json!(config.map(number)));
            Ok(())
        });

        Self {
            config,
            ports: MacroPorts::new()
                .with_input(DEFAULT_PORT, sink)
                .with_output(DEFAULT_PORT, output),
        }
    }

    pub fn config(&self) -> &ValueMapperConfig {
        &self.config
    }
}

impl MacroDescriptor for ValueMapper {
    fn descriptor() -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: Self::TYPE_ID.to_string(),
            name: "Value Mapper".to_string(),
            description: "Rescales numbers from an input range to an output range".to_string(),
            category: MacroCategory::Processor,
            config_schema: ConfigSchema::default(),
            inputs: vec![PortDefinition::required(DEFAULT_PORT, "Value", PortKind::Number)],
            outputs: vec![PortDefinition::required(DEFAULT_PORT, "Mapped", PortKind::Number)],
        }
    }
}

inventory::submit!(macro_engine::DescriptorFn(ValueMapper::descriptor));

#[async_trait]
impl MacroInstance for ValueMapper {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn mapper(output: [f64; 2]) -> ValueMapperConfig {
        ValueMapperConfig {
            input_range: midi_range(),
            output_range: output,
        }
    }

    #[test]
    fn test_maps_range_endpoints() {
        let config = mapper([50.0, 100.0]);
        assert_eq!(config.map(0.0), 50);
        assert_eq!(config.map(127.0), 100);

        let mid = config.map(64.0);
        assert!((74..=76).contains(&mid), "midpoint mapped to {}", mid);
    }

    #[test]
    fn test_clamps_outside_input_range() {
        let config = mapper([50.0, 100.0]);
        assert_eq!(config.map(-20.0), 50);
        assert_eq!(config.map(500.0), 100);
    }

    #[test]
    fn test_inverted_output_range() {
        let config = mapper([127.0, 0.0]);
        assert_eq!(config.map(0.0), 127);
        assert_eq!(config.map(127.0), 0);
    }

    #[test]
    fn test_degenerate_input_range() {
        let config = ValueMapperConfig {
            input_range: [5.0, 5.0],
            output_range: [10.0, 20.0],
        };
        assert_eq!(config.map(99.0), 10);
    }

    #[test]
    fn test_node_config_defaults_and_ports() {
        let node = NodeConfig::new("proc", ValueMapper::TYPE_ID).with_config(json!({"outputRange": [0, 10]}));
        let mapper = ValueMapper::new(&node).unwrap();
        assert_eq!(mapper.config().input_range, [0.0, 127.0]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = mapper
            .ports()
            .output(DEFAULT_PORT)
            .unwrap()
            .subscribe(move |v| sink.lock().push(v.clone()));

        let input = mapper.ports().input(DEFAULT_PORT).unwrap();
        input.push(json!(127)).unwrap();
        input.push(json!({"value": 0})).unwrap();
        assert!(input.push(json!(null)).is_err());

        assert_eq!(*seen.lock(), vec![json!(10), json!(0)]);
    }
}
