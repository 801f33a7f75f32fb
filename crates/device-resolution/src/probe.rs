//! Hardware discovery and assignment suggestions

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DeviceAssignment, DeviceConfiguration, DeviceType, MidiDevice};

/// Logical name suggested for the first free input device
pub const MAIN_CONTROLLER: &str = "main_controller";
/// Logical name suggested for the first free output device
pub const MAIN_SYNTH: &str = "main_synth";

/// A device reported by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedDevice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub channels: Vec<u8>,
}

impl DetectedDevice {
    fn to_midi_device(&self) -> MidiDevice {
        MidiDevice {
            id: self.id.clone(),
            name: self.name.clone(),
            manufacturer: self.manufacturer.clone(),
            available: true,
            channels: self.channels.clone(),
        }
    }
}

/// Platform collaborator listing currently connected MIDI devices
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DetectedDevice>>;
}

/// Result of auto-configuration. Advisory only: nothing is committed
/// until the caller applies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoConfiguration {
    pub input_devices: Vec<MidiDevice>,
    pub output_devices: Vec<MidiDevice>,
    pub suggested_assignments: HashMap<String, DeviceAssignment>,
}

/// Build suggestions from detected hardware against the current
/// configuration.
pub fn suggest_configuration(
    config: &DeviceConfiguration,
    detected: &[DetectedDevice],
) -> AutoConfiguration {
    let mut result = AutoConfiguration::default();

    for device in detected {
        match device.device_type {
            DeviceType::Input => result.input_devices.push(device.to_midi_device()),
            DeviceType::Output => result.output_devices.push(device.to_midi_device()),
        }
    }

    for (logical_name, device_type) in [
        (MAIN_CONTROLLER, DeviceType::Input),
        (MAIN_SYNTH, DeviceType::Output),
    ] {
        if config.logical_devices.contains_key(logical_name) {
            continue;
        }
        if let Some(device) = pick_unassigned(config, detected, device_type) {
            result.suggested_assignments.insert(
                logical_name.to_string(),
                DeviceAssignment {
                    device_id: device.id.clone(),
                    device_name: device.name.clone(),
                    device_type,
                },
            );
        }
    }

    result
}

/// First unassigned device of a direction, preferred vendors first.
fn pick_unassigned<'a>(
    config: &DeviceConfiguration,
    detected: &'a [DetectedDevice],
    device_type: DeviceType,
) -> Option<&'a DetectedDevice> {
    let unassigned = || {
        detected
            .iter()
            .filter(move |d| d.device_type == device_type && !config.is_assigned(&d.id))
    };

    let preferred: Vec<String> = config
        .preferences
        .preferred_vendors
        .iter()
        .map(|v| v.to_lowercase())
        .collect();

    let is_preferred = |d: &DetectedDevice| {
        let name = d.name.to_lowercase();
        let manufacturer = d.manufacturer.to_lowercase();
        preferred
            .iter()
            .any(|p| name.contains(p.as_str()) || manufacturer.contains(p.as_str()))
    };

    unassigned()
        .find(|d| is_preferred(d))
        .or_else(|| unassigned().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(id: &str, name: &str, manufacturer: &str, device_type: DeviceType) -> DetectedDevice {
        DetectedDevice {
            id: id.to_string(),
            name: name.to_string(),
            manufacturer: manufacturer.to_string(),
            device_type,
            channels: vec![],
        }
    }

    #[test]
    fn test_suggests_first_input_and_output() {
        let config = DeviceConfiguration::default();
        let devices = vec![
            detected("in-1", "Keys", "Acme", DeviceType::Input),
            detected("in-2", "Pads", "Acme", DeviceType::Input),
            detected("out-1", "Synth", "Acme", DeviceType::Output),
        ];

        let result = suggest_configuration(&config, &devices);
        assert_eq!(result.input_devices.len(), 2);
        assert_eq!(result.output_devices.len(), 1);
        assert_eq!(result.suggested_assignments[MAIN_CONTROLLER].device_id, "in-1");
        assert_eq!(result.suggested_assignments[MAIN_SYNTH].device_id, "out-1");
    }

    #[test]
    fn test_skips_assigned_devices() {
        let mut config = DeviceConfiguration::default();
        config.logical_devices.insert(
            "pads".to_string(),
            DeviceAssignment {
                device_id: "in-1".to_string(),
                device_name: "Keys".to_string(),
                device_type: DeviceType::Input,
            },
        );
        let devices = vec![
            detected("in-1", "Keys", "Acme", DeviceType::Input),
            detected("in-2", "Pads", "Acme", DeviceType::Input),
        ];

        let result = suggest_configuration(&config, &devices);
        assert_eq!(result.suggested_assignments[MAIN_CONTROLLER].device_id, "in-2");
        assert!(!result.suggested_assignments.contains_key(MAIN_SYNTH));
    }

    #[test]
    fn test_prefers_vendor_pattern() {
        let mut config = DeviceConfiguration::default();
        config.preferences.preferred_vendors = vec!["roland".to_string()];
        let devices = vec![
            detected("in-1", "Generic Keys", "NoName", DeviceType::Input),
            detected("in-2", "A-49", "Roland", DeviceType::Input),
        ];

        let result = suggest_configuration(&config, &devices);
        assert_eq!(result.suggested_assignments[MAIN_CONTROLLER].device_id, "in-2");
    }

    #[test]
    fn test_existing_main_controller_not_replaced() {
        let mut config = DeviceConfiguration::default();
        config.logical_devices.insert(
            MAIN_CONTROLLER.to_string(),
            DeviceAssignment {
                device_id: "gone".to_string(),
                device_name: "Old".to_string(),
                device_type: DeviceType::Input,
            },
        );
        let devices = vec![detected("in-1", "Keys", "Acme", DeviceType::Input)];

        let result = suggest_configuration(&config, &devices);
        assert!(result.suggested_assignments.is_empty());
    }
}
