//! Node configuration shared by the built-in macros

use macro_engine::{MacroEngineError, NodeConfig, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_channel() -> u8 {
    1
}

fn default_cc() -> u8 {
    1
}

/// A single controller on one channel of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlConfig {
    pub device_name: String,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_cc")]
    pub cc: u8,
}

impl ControlConfig {
    fn check(&self, node_id: &str) -> Result<()> {
        check_channel(node_id, Some(self.channel))?;
        if self.cc > 127 {
            return Err(MacroEngineError::instantiation(
                node_id,
                format!("CC {} out of range (0-127)", self.cc),
            ));
        }
        Ok(())
    }
}

/// A whole device, optionally restricted to one channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
}

fn check_channel(node_id: &str, channel: Option<u8>) -> Result<()> {
    match channel {
        Some(ch) if !(1..=16).contains(&ch) => Err(MacroEngineError::instantiation(
            node_id,
            format!("channel {} out of range (1-16)", ch),
        )),
        _ => Ok(()),
    }
}

/// Deserialize a node's config object, naming the node on failure
pub(crate) fn parse<T: DeserializeOwned>(node: &NodeConfig) -> Result<T> {
    serde_json::from_value(node.config.clone())
        .map_err(|e| MacroEngineError::instantiation(&node.id, format!("invalid config: {}", e)))
}

pub(crate) fn parse_control(node: &NodeConfig) -> Result<ControlConfig> {
    let config: ControlConfig = parse(node)?;
    config.check(&node.id)?;
    Ok(config)
}

pub(crate) fn parse_port(node: &NodeConfig) -> Result<PortConfig> {
    let config: PortConfig = parse(node)?;
    check_channel(&node.id, config.channel)?;
    Ok(config)
}

/// Read a numeric event: a bare number or an object with a numeric `value`
pub fn numeric_value(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.get("value").and_then(Value::as_f64))
}

/// Clamp and round to a 7-bit MIDI data value
pub fn to_data_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 127.0) as u8
}
