//! Logical template configuration and its physical translation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A channel or CC given either as a number or as a logical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogicalValue {
    Number(u8),
    Name(String),
}

impl From<u8> for LogicalValue {
    fn from(value: u8) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for LogicalValue {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

/// Template parameters expressed with logical names.
///
/// Fields not listed here are kept in `extra` and passed through as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalTemplateConfig {
    pub input_device: Option<String>,
    pub input_channel: Option<LogicalValue>,
    #[serde(rename = "inputCC")]
    pub input_cc: Option<LogicalValue>,
    pub output_device: Option<String>,
    pub output_channel: Option<LogicalValue>,
    #[serde(rename = "outputCC")]
    pub output_cc: Option<LogicalValue>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub channel_map: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Template parameters after translation to physical values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalTemplateConfig {
    pub input_device: Option<String>,
    pub input_channel: Option<u8>,
    #[serde(rename = "inputCC")]
    pub input_cc: Option<u8>,
    pub output_device: Option<String>,
    pub output_channel: Option<u8>,
    #[serde(rename = "outputCC")]
    pub output_cc: Option<u8>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub channel_map: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
