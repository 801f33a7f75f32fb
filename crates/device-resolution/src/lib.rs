//! Device Resolution - logical names for physical MIDI hardware
//!
//! Workflows refer to devices, channels and controllers by stable logical
//! names (`main_controller`, `volume`, ...). This crate owns the user
//! configuration mapping those names to whatever hardware is currently
//! connected, so workflows survive hardware changes.
//!
//! - `DeviceConfiguration`: the user-owned mapping document
//! - `DeviceResolver`: resolution, mutation and change broadcast
//! - `DeviceProbe`: hardware discovery collaborator used by auto-configure

pub mod error;
pub mod probe;
pub mod resolver;
pub mod template;
pub mod types;

pub use error::{DeviceError, Result};
pub use probe::{AutoConfiguration, DetectedDevice, DeviceProbe};
pub use resolver::{DeviceResolver, DEVICE_CONFIGURATION_KEY};
pub use template::{LogicalTemplateConfig, LogicalValue, PhysicalTemplateConfig};
pub use types::{
    AnyKeyword, CcRange, ConnectionRequest, DeviceAssignment, DeviceCapabilities,
    DeviceConfiguration, DeviceConfigurationPatch, DevicePreferences, DeviceType, MidiDevice,
    MidiRequest, ResolvedConnection, Selector,
};
