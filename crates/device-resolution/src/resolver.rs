//! Resolution of logical device requests against the user configuration.

use std::sync::Arc;

use parking_lot::RwLock;
use persistent_state::{create_persistent_state, PersistentState, StateBackend};
use tokio::sync::broadcast;

use crate::error::{DeviceError, Result};
use crate::probe::{suggest_configuration, AutoConfiguration, DeviceProbe};
use crate::template::{LogicalTemplateConfig, LogicalValue, PhysicalTemplateConfig};
use crate::types::{
    CcRange, DeviceCapabilities, DeviceConfiguration, DeviceConfigurationPatch, DeviceType,
    MidiDevice, MidiRequest, ResolvedConnection, Selector, MAX_CC, MAX_CHANNEL, MIN_CHANNEL,
};

/// Persistence key for the device configuration document
pub const DEVICE_CONFIGURATION_KEY: &str = "device_configuration";

/// Channel or CC used when a logical name is not configured
const UNRESOLVED_DEFAULT: u8 = 1;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Owner of the device configuration document.
///
/// Resolution reads are synchronous and never observe a half-applied
/// update: mutations build a new document, persist it, then swap it in.
pub struct DeviceResolver {
    config: RwLock<DeviceConfiguration>,
    state: Option<PersistentState<DeviceConfiguration>>,
    changes: broadcast::Sender<DeviceConfiguration>,
}

impl DeviceResolver {
    /// Create a resolver over an in-memory configuration
    pub fn new(config: DeviceConfiguration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            config: RwLock::new(config),
            state: None,
            changes,
        }
    }

    /// Create a resolver whose configuration is loaded from and saved to
    /// `backend`. Absent state yields the factory default.
    pub async fn with_persistence(backend: Arc<dyn StateBackend>) -> Self {
        let state = create_persistent_state(
            backend,
            DEVICE_CONFIGURATION_KEY,
            DeviceConfiguration::default(),
        );
        let config = state.get_state().await;
        log::info!(
            "Loaded device configuration: {} inputs, {} outputs, {} logical devices",
            config.input_devices.len(),
            config.output_devices.len(),
            config.logical_devices.len()
        );

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            config: RwLock::new(config),
            state: Some(state),
            changes,
        }
    }

    /// Snapshot of the current configuration
    pub fn configuration(&self) -> DeviceConfiguration {
        self.config.read().clone()
    }

    /// Receive every configuration that replaces the current one
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceConfiguration> {
        self.changes.subscribe()
    }

    /// Resolve a logical request to a physical device.
    ///
    /// The primary assignment is tried first, then each fallback in
    /// order; the first assignment of the requested direction whose
    /// device is present and available wins.
    pub fn resolve_midi_request(&self, request: &MidiRequest) -> Result<ResolvedConnection> {
        let config = self.config.read();
        resolve_request(&config, request)
    }

    /// Translate a logical template configuration to physical values.
    ///
    /// Best effort per field: devices that cannot be resolved keep their
    /// logical name, unknown channel/CC names fall back to 1, and numbers
    /// outside the MIDI range are clamped into it.
    pub fn resolve_logical_template(&self, logical: &LogicalTemplateConfig) -> PhysicalTemplateConfig {
        let config = self.config.read();

        let device = |name: &Option<String>, device_type: DeviceType| {
            name.as_ref().map(|name| {
                match resolve_request(&config, &MidiRequest::new(name.clone(), device_type)) {
                    Ok(resolved) => resolved.device_name,
                    Err(e) => {
                        log::warn!("Keeping logical device name '{}': {}", name, e);
                        name.clone()
                    }
                }
            })
        };
        let channel = |value: &Option<LogicalValue>| {
            value
                .as_ref()
                .map(|v| clamp_to("channel", lookup(&config.logical_channels, v), MIN_CHANNEL, MAX_CHANNEL))
        };
        let cc = |value: &Option<LogicalValue>| {
            value
                .as_ref()
                .map(|v| clamp_to("CC", lookup(&config.logical_ccs, v), 0, MAX_CC))
        };

        PhysicalTemplateConfig {
            input_device: device(&logical.input_device, DeviceType::Input),
            input_channel: channel(&logical.input_channel),
            input_cc: cc(&logical.input_cc),
            output_device: device(&logical.output_device, DeviceType::Output),
            output_channel: channel(&logical.output_channel),
            output_cc: cc(&logical.output_cc),
            min_value: logical.min_value,
            max_value: logical.max_value,
            channel_map: logical.channel_map.clone(),
            extra: logical.extra.clone(),
        }
    }

    /// Channel for a logical name (1 if unknown)
    pub fn get_logical_channel(&self, name: &str) -> u8 {
        self.config
            .read()
            .logical_channels
            .get(name)
            .copied()
            .unwrap_or(UNRESOLVED_DEFAULT)
    }

    /// CC number for a logical name (1 if unknown)
    pub fn get_logical_cc(&self, name: &str) -> u8 {
        self.config
            .read()
            .logical_ccs
            .get(name)
            .copied()
            .unwrap_or(UNRESOLVED_DEFAULT)
    }

    /// Merge a partial update into the configuration and broadcast it
    pub async fn update_user_configuration(&self, patch: DeviceConfigurationPatch) -> Result<()> {
        let mut next = self.configuration();
        patch.apply_to(&mut next);
        self.replace(next).await
    }

    /// Replace the configuration with the factory default and broadcast it
    pub async fn reset_to_defaults(&self) -> Result<()> {
        log::info!("Resetting device configuration to defaults");
        self.replace(DeviceConfiguration::default()).await
    }

    /// Probe connected hardware and suggest assignments.
    ///
    /// Nothing is committed; apply the result with
    /// [`update_user_configuration`](Self::update_user_configuration).
    pub async fn auto_configure_devices(&self, probe: &dyn DeviceProbe) -> Result<AutoConfiguration> {
        let detected = probe.list_devices().await?;
        let config = self.configuration();
        let suggestion = suggest_configuration(&config, &detected);
        log::info!(
            "Auto-configure found {} devices, suggesting {} assignments",
            detected.len(),
            suggestion.suggested_assignments.len()
        );
        Ok(suggestion)
    }

    async fn replace(&self, next: DeviceConfiguration) -> Result<()> {
        if let Some(state) = &self.state {
            state.set_state(&next).await.map_err(DeviceError::from)?;
        }
        *self.config.write() = next.clone();
        // No receivers is fine
        let _ = self.changes.send(next);
        Ok(())
    }
}

fn lookup(table: &std::collections::HashMap<String, u8>, value: &LogicalValue) -> u8 {
    match value {
        LogicalValue::Number(n) => *n,
        LogicalValue::Name(name) => match table.get(name) {
            Some(n) => *n,
            None => {
                log::warn!("Unknown logical name '{}', using {}", name, UNRESOLVED_DEFAULT);
                UNRESOLVED_DEFAULT
            }
        },
    }
}

fn clamp_to(what: &str, value: u8, min: u8, max: u8) -> u8 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("MIDI {} {} out of range {}-{}, using {}", what, value, min, max, clamped);
    }
    clamped
}

fn resolve_request(config: &DeviceConfiguration, request: &MidiRequest) -> Result<ResolvedConnection> {
    if !config.logical_devices.contains_key(&request.purpose) {
        return Err(DeviceError::NoAssignment(request.purpose.clone()));
    }

    let device_type = request.connection.device_type;
    let mut tried = Vec::new();

    for name in std::iter::once(&request.purpose).chain(request.fallbacks.iter()) {
        tried.push(name.clone());
        let Some(assignment) = config.logical_devices.get(name) else {
            log::debug!("Fallback '{}' has no assignment", name);
            continue;
        };
        if assignment.device_type != device_type {
            log::debug!("Assignment '{}' is not an {:?} device", name, device_type);
            continue;
        }
        match config.find_device(device_type, &assignment.device_id) {
            Some(device) if device.available => {
                if name != &request.purpose {
                    log::info!(
                        "Resolved '{}' through fallback '{}' -> {}",
                        request.purpose,
                        name,
                        device.name
                    );
                }
                return Ok(build_resolved(request, name, device, device_type));
            }
            Some(device) => log::debug!("Device '{}' for '{}' is unavailable", device.name, name),
            None => log::debug!("Device '{}' for '{}' is not known", assignment.device_id, name),
        }
    }

    Err(DeviceError::DeviceUnavailable {
        purpose: request.purpose.clone(),
        tried,
    })
}

fn build_resolved(
    request: &MidiRequest,
    resolved_from: &str,
    device: &MidiDevice,
    device_type: DeviceType,
) -> ResolvedConnection {
    let channel = match request.connection.channels {
        Some(Selector::Exact(channel)) => channel,
        Some(Selector::Any(_)) | None => device.channels.first().copied().unwrap_or(MIN_CHANNEL),
    };
    let cc = match request.connection.ccs {
        Some(Selector::Exact(cc)) => Some(cc),
        Some(Selector::Any(_)) | None => None,
    };
    let channels = if device.channels.is_empty() {
        (MIN_CHANNEL..=MAX_CHANNEL).collect()
    } else {
        device.channels.clone()
    };

    ResolvedConnection {
        purpose: request.purpose.clone(),
        resolved_from: resolved_from.to_string(),
        device_id: device.id.clone(),
        device_name: device.name.clone(),
        device_type,
        channel,
        cc,
        validated: true,
        capabilities: DeviceCapabilities {
            channels,
            cc_range: CcRange { min: 0, max: MAX_CC },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::DetectedDevice;
    use crate::types::{DeviceAssignment, MidiDevice};
    use async_trait::async_trait;
    use persistent_state::MemoryBackend;

    fn device(id: &str, name: &str, available: bool, channels: Vec<u8>) -> MidiDevice {
        MidiDevice {
            id: id.to_string(),
            name: name.to_string(),
            manufacturer: "Acme".to_string(),
            available,
            channels,
        }
    }

    fn assign(id: &str, name: &str, device_type: DeviceType) -> DeviceAssignment {
        DeviceAssignment {
            device_id: id.to_string(),
            device_name: name.to_string(),
            device_type,
        }
    }

    fn test_config() -> DeviceConfiguration {
        let mut config = DeviceConfiguration::default();
        config.input_devices = vec![
            device("keys-1", "Keys One", false, vec![]),
            device("pads-1", "Pads", true, vec![3, 4]),
        ];
        config.output_devices = vec![device("synth-1", "Synth", true, vec![])];
        config
            .logical_devices
            .insert("main_controller".into(), assign("keys-1", "Keys One", DeviceType::Input));
        config
            .logical_devices
            .insert("backup_controller".into(), assign("pads-1", "Pads", DeviceType::Input));
        config
            .logical_devices
            .insert("main_synth".into(), assign("synth-1", "Synth", DeviceType::Output));
        config
    }

    #[test]
    fn test_resolves_available_device() {
        let resolver = DeviceResolver::new(test_config());
        let request = MidiRequest::new("main_synth", DeviceType::Output)
            .with_channel(Selector::Exact(2))
            .with_cc(Selector::Exact(7));

        let resolved = resolver.resolve_midi_request(&request).unwrap();
        assert_eq!(resolved.device_name, "Synth");
        assert_eq!(resolved.channel, 2);
        assert_eq!(resolved.cc, Some(7));
        assert!(resolved.validated);
        assert_eq!(resolved.capabilities.channels.len(), 16);
        assert_eq!(resolved.capabilities.cc_range, CcRange { min: 0, max: 127 });
    }

    #[test]
    fn test_falls_back_when_primary_unavailable() {
        let resolver = DeviceResolver::new(test_config());
        let request = MidiRequest::new("main_controller", DeviceType::Input)
            .with_channel(Selector::any())
            .with_fallback("missing_name")
            .with_fallback("backup_controller");

        let resolved = resolver.resolve_midi_request(&request).unwrap();
        assert_eq!(resolved.device_id, "pads-1");
        assert_eq!(resolved.resolved_from, "backup_controller");
        // "any" picks the first declared channel
        assert_eq!(resolved.channel, 3);
        assert_eq!(resolved.cc, None);
        assert_eq!(resolved.capabilities.channels, vec![3, 4]);
    }

    #[test]
    fn test_no_assignment() {
        let resolver = DeviceResolver::new(test_config());
        let result = resolver.resolve_midi_request(&MidiRequest::new("nope", DeviceType::Input));
        assert!(matches!(result, Err(DeviceError::NoAssignment(p)) if p == "nope"));
    }

    #[test]
    fn test_unavailable_without_fallbacks() {
        let resolver = DeviceResolver::new(test_config());
        let result =
            resolver.resolve_midi_request(&MidiRequest::new("main_controller", DeviceType::Input));
        match result {
            Err(DeviceError::DeviceUnavailable { purpose, tried }) => {
                assert_eq!(purpose, "main_controller");
                assert_eq!(tried, vec!["main_controller".to_string()]);
            }
            other => panic!("Expected DeviceUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_fallback_of_wrong_direction_is_skipped() {
        let resolver = DeviceResolver::new(test_config());
        let request =
            MidiRequest::new("main_controller", DeviceType::Input).with_fallback("main_synth");
        assert!(matches!(
            resolver.resolve_midi_request(&request),
            Err(DeviceError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_logical_lookups_default_to_one() {
        let resolver = DeviceResolver::new(DeviceConfiguration::default());
        assert_eq!(resolver.get_logical_channel("drums"), 10);
        assert_eq!(resolver.get_logical_channel("unknown"), 1);
        assert_eq!(resolver.get_logical_cc("volume"), 7);
        assert_eq!(resolver.get_logical_cc("unknown"), 1);
    }

    #[test]
    fn test_resolve_logical_template() {
        let resolver = DeviceResolver::new(test_config());
        let logical = LogicalTemplateConfig {
            input_device: Some("backup_controller".into()),
            input_channel: Some("drums".into()),
            input_cc: Some("typo".into()),
            output_device: Some("not_configured".into()),
            output_channel: Some(5.into()),
            output_cc: Some("volume".into()),
            min_value: Some(10),
            ..Default::default()
        };

        let physical = resolver.resolve_logical_template(&logical);
        assert_eq!(physical.input_device.as_deref(), Some("Pads"));
        assert_eq!(physical.input_channel, Some(10));
        assert_eq!(physical.input_cc, Some(1));
        assert_eq!(physical.output_device.as_deref(), Some("not_configured"));
        assert_eq!(physical.output_channel, Some(5));
        assert_eq!(physical.output_cc, Some(7));
        assert_eq!(physical.min_value, Some(10));
        assert_eq!(physical.max_value, None);
    }

    #[test]
    fn test_logical_template_clamps_numbers() {
        let resolver = DeviceResolver::new(test_config());
        let logical = LogicalTemplateConfig {
            input_channel: Some(0.into()),
            input_cc: Some(200.into()),
            output_channel: Some(200.into()),
            output_cc: Some(127.into()),
            ..Default::default()
        };

        let physical = resolver.resolve_logical_template(&logical);
        assert_eq!(physical.input_channel, Some(MIN_CHANNEL));
        assert_eq!(physical.input_cc, Some(MAX_CC));
        assert_eq!(physical.output_channel, Some(MAX_CHANNEL));
        assert_eq!(physical.output_cc, Some(127));
    }

    #[tokio::test]
    async fn test_update_broadcasts_and_persists() {
        let backend = Arc::new(MemoryBackend::new());
        let resolver = DeviceResolver::with_persistence(backend.clone()).await;
        let mut changes = resolver.subscribe();

        resolver
            .update_user_configuration(DeviceConfigurationPatch {
                output_devices: Some(vec![device("synth-2", "Second", true, vec![])]),
                ..Default::default()
            })
            .await
            .unwrap();

        let broadcast = changes.recv().await.unwrap();
        assert_eq!(broadcast.output_devices[0].id, "synth-2");

        // A fresh resolver over the same backend sees the update
        let reloaded = DeviceResolver::with_persistence(backend).await;
        assert_eq!(reloaded.configuration().output_devices.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_to_defaults() {
        let resolver = DeviceResolver::new(test_config());
        let mut changes = resolver.subscribe();

        resolver.reset_to_defaults().await.unwrap();

        assert!(resolver.configuration().logical_devices.is_empty());
        assert_eq!(changes.recv().await.unwrap(), DeviceConfiguration::default());
    }

    struct FixedProbe(Vec<DetectedDevice>);

    #[async_trait]
    impl DeviceProbe for FixedProbe {
        async fn list_devices(&self) -> Result<Vec<DetectedDevice>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_auto_configure_does_not_commit() {
        let resolver = DeviceResolver::new(DeviceConfiguration::default());
        let probe = FixedProbe(vec![DetectedDevice {
            id: "in-1".into(),
            name: "Keys".into(),
            manufacturer: "Acme".into(),
            device_type: DeviceType::Input,
            channels: vec![],
        }]);

        let suggestion = resolver.auto_configure_devices(&probe).await.unwrap();
        assert!(suggestion.suggested_assignments.contains_key("main_controller"));
        assert!(resolver.configuration().logical_devices.is_empty());
    }
}
