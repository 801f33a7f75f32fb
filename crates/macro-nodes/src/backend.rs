//! MIDI I/O collaborator
//!
//! Macros never open hardware ports themselves; they go through a
//! `MidiBackend`. The loopback backend keeps everything in memory, which is
//! what tests and the headless host use.

use std::collections::HashMap;

use async_trait::async_trait;
use device_resolution::{DetectedDevice, DeviceProbe, DeviceType};
use macro_engine::OutputStream;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::midi::{MidiError, MidiMessage};

/// Access to MIDI ports by device name
pub trait MidiBackend: Send + Sync {
    /// Stream of messages arriving from an input device, each emitted as
    /// a serialized `MidiMessage`
    fn input_stream(&self, device: &str) -> Result<OutputStream, MidiError>;

    /// Send one message to an output device
    fn send(&self, device: &str, message: &MidiMessage) -> Result<(), MidiError>;

    fn is_connected(&self, device: &str, device_type: DeviceType) -> bool;
}

/// A message handed to an output device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub device: String,
    pub message: MidiMessage,
}

/// In-memory backend: inject input, inspect output
#[derive(Default)]
pub struct LoopbackMidiBackend {
    devices: RwLock<Vec<DetectedDevice>>,
    inputs: Mutex<HashMap<String, OutputStream>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl LoopbackMidiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder shorthand for a connected input device
    pub fn with_input(self, name: &str) -> Self {
        self.connect(device(name, DeviceType::Input));
        self
    }

    /// Builder shorthand for a connected output device
    pub fn with_output(self, name: &str) -> Self {
        self.connect(device(name, DeviceType::Output));
        self
    }

    /// Plug a device in, replacing any device with the same id
    pub fn connect(&self, device: DetectedDevice) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.id != device.id);
        log::debug!("Loopback device connected: {} ({:?})", device.name, device.device_type);
        devices.push(device);
    }

    /// Unplug a device by name. Returns whether it was connected.
    pub fn disconnect(&self, name: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|d| d.name != name);
        self.inputs.lock().remove(name);
        before != devices.len()
    }

    /// Deliver a message as if it arrived from an input device
    pub fn inject(&self, device: &str, message: MidiMessage) -> Result<(), MidiError> {
        message.validate()?;
        let stream = self.input_stream(device)?;
        let value = serde_json::to_value(message).map_err(|e| MidiError::InvalidMessage(e.to_string()))?;
        stream.emit(value);
        Ok(())
    }

    /// Every message sent so far, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, device: &str) -> Vec<MidiMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.device == device)
            .map(|s| s.message)
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

fn device(name: &str, device_type: DeviceType) -> DetectedDevice {
    let prefix = match device_type {
        DeviceType::Input => "in",
        DeviceType::Output => "out",
    };
    DetectedDevice {
        id: format!("loopback-{}-{}", prefix, name.to_lowercase().replace(' ', "-")),
        name: name.to_string(),
        manufacturer: "Loopback".to_string(),
        device_type,
        channels: Vec::new(),
    }
}

impl MidiBackend for LoopbackMidiBackend {
    fn input_stream(&self, device: &str) -> Result<OutputStream, MidiError> {
        if !self.is_connected(device, DeviceType::Input) {
            return Err(MidiError::DeviceNotFound(device.to_string()));
        }
        Ok(self.inputs.lock().entry(device.to_string()).or_default().clone())
    }

    fn send(&self, device: &str, message: &MidiMessage) -> Result<(), MidiError> {
        if !self.is_connected(device, DeviceType::Output) {
            return Err(MidiError::DeviceNotFound(device.to_string()));
        }
        message.validate()?;
        self.sent.lock().push(SentMessage {
            device: device.to_string(),
            message: *message,
        });
        Ok(())
    }

    fn is_connected(&self, device: &str, device_type: DeviceType) -> bool {
        self.devices
            .read()
            .iter()
            .any(|d| d.device_type == device_type && (d.name == device || d.id == device))
    }
}

#[async_trait]
impl DeviceProbe for LoopbackMidiBackend {
    async fn list_devices(&self) -> device_resolution::Result<Vec<DetectedDevice>> {
        Ok(self.devices.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_inject_reaches_subscribers() {
        let backend = LoopbackMidiBackend::new().with_input("Keys");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = backend
            .input_stream("Keys")
            .unwrap()
            .subscribe(move |v| sink.lock().push(v.clone()));

        let message = MidiMessage::control_change(1, 1, 42).unwrap();
        backend.inject("Keys", message).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(serde_json::from_value::<MidiMessage>(seen[0].clone()).unwrap(), message);
    }

    #[test]
    fn test_direction_is_checked() {
        let backend = LoopbackMidiBackend::new().with_input("Keys").with_output("Synth");
        let message = MidiMessage::control_change(1, 7, 1).unwrap();

        assert!(backend.send("Synth", &message).is_ok());
        assert_eq!(
            backend.send("Keys", &message).unwrap_err(),
            MidiError::DeviceNotFound("Keys".to_string())
        );
        assert!(backend.input_stream("Synth").is_err());
        assert_eq!(backend.sent_to("Synth"), vec![message]);
    }

    #[test]
    fn test_disconnect() {
        let backend = LoopbackMidiBackend::new().with_output("Synth");
        assert!(backend.disconnect("Synth"));
        assert!(!backend.disconnect("Synth"));
        assert!(!backend.is_connected("Synth", DeviceType::Output));
    }

    #[tokio::test]
    async fn test_probe_lists_devices() {
        let backend = LoopbackMidiBackend::new().with_input("Keys").with_output("Synth");
        let devices = backend.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "loopback-in-keys");
    }
}
