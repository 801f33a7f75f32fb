//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default persistence key for the workflow definition map
pub const DEFAULT_PERSISTENCE_KEY: &str = "macro_workflows";

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub connections: ConnectionSettings,
    pub validation: ValidationLimits,
    /// Key the workflow definitions are stored under
    pub persistence_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connections: ConnectionSettings::default(),
            validation: ValidationLimits::default(),
            persistence_key: DEFAULT_PERSISTENCE_KEY.to_string(),
        }
    }
}

/// Connection manager timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Minimum spacing between forwarded events on one connection
    pub throttle_window_ms: u64,
    /// How often connection health is evaluated
    pub health_check_interval_ms: u64,
    /// How often aggregate throughput is sampled
    pub metrics_tick_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            throttle_window_ms: 1,
            health_check_interval_ms: 5000,
            metrics_tick_ms: 1000,
        }
    }
}

impl ConnectionSettings {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }

    /// Silence after which a connection is reported unhealthy
    pub fn unhealthy_after(&self) -> Duration {
        self.health_check_interval() * 2
    }

    pub fn metrics_tick(&self) -> Duration {
        Duration::from_millis(self.metrics_tick_ms.max(1))
    }
}

/// Thresholds used by the graph validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationLimits {
    pub max_nodes: usize,
    pub max_connections: usize,
    /// Incoming connections above which a node is a bottleneck
    pub max_incoming: usize,
    /// connections / (nodes * (nodes - 1))
    pub max_density: f64,
    /// Fan-out above this is a medium issue
    pub fan_out_medium: usize,
    /// Fan-out above this is a high issue
    pub fan_out_high: usize,
    /// MIDI-typed nodes above this exceed the realtime budget
    pub max_realtime_midi_nodes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_nodes: 50,
            max_connections: 100,
            max_incoming: 10,
            max_density: 0.30,
            fan_out_medium: 5,
            fan_out_high: 10,
            max_realtime_midi_nodes: 20,
        }
    }
}
