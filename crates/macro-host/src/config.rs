//! Host configuration storage
//!
//! Read once at startup from a JSON file. A missing file means defaults.

use std::path::{Path, PathBuf};

use macro_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "MACRO_HOST_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "macro-host.json";

/// Full host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Directory holding persisted workflows and device assignments
    pub data_dir: PathBuf,
    pub engine: EngineConfig,
    /// env_logger filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Log suggested device assignments when none are configured
    pub suggest_devices: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            engine: EngineConfig::default(),
            log_filter: "info".to_string(),
            suggest_devices: true,
        }
    }
}

impl HostConfig {
    /// Config file path from the environment, or the default file name
    pub fn path_from_env() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from disk
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !fs::try_exists(path).await.map_err(ConfigError::Io)? {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;
        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, r#"{"dataDir": "/var/lib/macros", "engine": {"connections": {"throttleWindowMs": 5}}}"#)
            .await
            .unwrap();

        let config = HostConfig::load(&path).await.unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/macros"));
        assert_eq!(config.engine.connections.throttle_window_ms, 5);
        assert_eq!(config.engine.connections.health_check_interval_ms, 5000);
        assert_eq!(config.log_filter, "info");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("host.json");
        let config = HostConfig {
            log_filter: "debug".to_string(),
            suggest_devices: false,
            ..HostConfig::default()
        };

        config.save(&path).await.unwrap();
        assert_eq!(HostConfig::load(&path).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, "{ not json").await.unwrap();

        assert!(matches!(HostConfig::load(&path).await, Err(ConfigError::Parse(_))));
    }
}
