//! Device configuration and resolution types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lowest MIDI channel number
pub const MIN_CHANNEL: u8 = 1;
/// Highest MIDI channel number
pub const MAX_CHANNEL: u8 = 16;
/// Highest MIDI controller number
pub const MAX_CC: u8 = 127;

/// Direction of a MIDI device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Input,
    Output,
}

/// A physical MIDI device known to the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiDevice {
    /// Stable hardware identifier
    pub id: String,
    /// Display name (also the name drivers open ports by)
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    /// Whether the device is currently connected
    pub available: bool,
    /// Channels the device declares it can use (empty = all 16)
    #[serde(default)]
    pub channels: Vec<u8>,
}

/// Binding of a logical name to a physical device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAssignment {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
}

/// Global device preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevicePreferences {
    pub default_input_latency_ms: u32,
    pub default_output_latency_ms: u32,
    /// Probe hardware on startup
    pub auto_detect: bool,
    /// Case-insensitive name fragments preferred during auto-configuration
    pub preferred_vendors: Vec<String>,
}

impl Default for DevicePreferences {
    fn default() -> Self {
        Self {
            default_input_latency_ms: 5,
            default_output_latency_ms: 5,
            auto_detect: true,
            preferred_vendors: Vec::new(),
        }
    }
}

/// The user-owned device configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceConfiguration {
    pub input_devices: Vec<MidiDevice>,
    pub output_devices: Vec<MidiDevice>,
    /// Logical device name -> physical assignment
    pub logical_devices: HashMap<String, DeviceAssignment>,
    /// Logical channel name -> channel (1-16)
    pub logical_channels: HashMap<String, u8>,
    /// Logical controller name -> CC number (0-127)
    pub logical_ccs: HashMap<String, u8>,
    pub preferences: DevicePreferences,
}

impl Default for DeviceConfiguration {
    /// The factory default: no devices, a handful of common channel and
    /// controller names.
    fn default() -> Self {
        let logical_channels = [("main", 1), ("drums", 10)]
            .into_iter()
            .map(|(name, channel)| (name.to_string(), channel))
            .collect();
        let logical_ccs = [
            ("mod_wheel", 1),
            ("breath", 2),
            ("volume", 7),
            ("pan", 10),
            ("expression", 11),
            ("sustain", 64),
        ]
        .into_iter()
        .map(|(name, cc)| (name.to_string(), cc))
        .collect();

        Self {
            input_devices: Vec::new(),
            output_devices: Vec::new(),
            logical_devices: HashMap::new(),
            logical_channels,
            logical_ccs,
            preferences: DevicePreferences::default(),
        }
    }
}

impl DeviceConfiguration {
    /// Devices of the given direction
    pub fn devices(&self, device_type: DeviceType) -> &[MidiDevice] {
        match device_type {
            DeviceType::Input => &self.input_devices,
            DeviceType::Output => &self.output_devices,
        }
    }

    /// Find a device of the given direction by hardware id
    pub fn find_device(&self, device_type: DeviceType, device_id: &str) -> Option<&MidiDevice> {
        self.devices(device_type).iter().find(|d| d.id == device_id)
    }

    /// Whether any logical assignment points at this device
    pub fn is_assigned(&self, device_id: &str) -> bool {
        self.logical_devices
            .values()
            .any(|assignment| assignment.device_id == device_id)
    }
}

/// Partial configuration update; each present key replaces the whole
/// top-level value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfigurationPatch {
    pub input_devices: Option<Vec<MidiDevice>>,
    pub output_devices: Option<Vec<MidiDevice>>,
    pub logical_devices: Option<HashMap<String, DeviceAssignment>>,
    pub logical_channels: Option<HashMap<String, u8>>,
    pub logical_ccs: Option<HashMap<String, u8>>,
    pub preferences: Option<DevicePreferences>,
}

impl DeviceConfigurationPatch {
    /// Apply this patch to a configuration
    pub fn apply_to(self, config: &mut DeviceConfiguration) {
        if let Some(v) = self.input_devices {
            config.input_devices = v;
        }
        if let Some(v) = self.output_devices {
            config.output_devices = v;
        }
        if let Some(v) = self.logical_devices {
            config.logical_devices = v;
        }
        if let Some(v) = self.logical_channels {
            config.logical_channels = v;
        }
        if let Some(v) = self.logical_ccs {
            config.logical_ccs = v;
        }
        if let Some(v) = self.preferences {
            config.preferences = v;
        }
    }
}

/// The literal `"any"` in a channel or CC selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyKeyword {
    #[serde(rename = "any")]
    Any,
}

/// Channel or CC selector: an explicit number or `"any"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Exact(u8),
    Any(AnyKeyword),
}

impl Selector {
    pub fn any() -> Self {
        Self::Any(AnyKeyword::Any)
    }
}

/// What the caller wants to connect to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub channels: Option<Selector>,
    pub ccs: Option<Selector>,
}

/// A request to resolve a logical device purpose
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiRequest {
    /// Logical device name, e.g. `main_controller`
    pub purpose: String,
    pub connection: ConnectionRequest,
    /// Logical names tried in order when the primary device is unavailable
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl MidiRequest {
    pub fn new(purpose: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            purpose: purpose.into(),
            connection: ConnectionRequest {
                device_type,
                channels: None,
                ccs: None,
            },
            fallbacks: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Selector) -> Self {
        self.connection.channels = Some(channel);
        self
    }

    pub fn with_cc(mut self, cc: Selector) -> Self {
        self.connection.ccs = Some(cc);
        self
    }

    pub fn with_fallback(mut self, logical_name: impl Into<String>) -> Self {
        self.fallbacks.push(logical_name.into());
        self
    }
}

/// Inclusive controller number range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcRange {
    pub min: u8,
    pub max: u8,
}

/// Capabilities reported for a resolved device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub channels: Vec<u8>,
    pub cc_range: CcRange,
}

/// A logical request bound to a physical device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConnection {
    /// The purpose that was requested
    pub purpose: String,
    /// The logical name that actually resolved (purpose or a fallback)
    pub resolved_from: String,
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub channel: u8,
    pub cc: Option<u8>,
    pub validated: bool,
    pub capabilities: DeviceCapabilities,
}
