//! Macro host
//!
//! Loads persisted workflows, runs them until interrupted, then tears
//! every instance down.

mod config;

use std::sync::Arc;

use config::HostConfig;
use device_resolution::DeviceResolver;
use macro_engine::{MacroTypeRegistry, WorkflowManager};
use macro_nodes::{builtin_templates, register_builtins, LoopbackMidiBackend, MidiBackend};
use persistent_state::{JsonFileBackend, StateBackend};

#[tokio::main]
async fn main() {
    let config_path = HostConfig::path_from_env();
    let loaded = HostConfig::load(&config_path).await;
    let filter = loaded
        .as_ref()
        .map(|c| c.log_filter.clone())
        .unwrap_or_else(|_| "info".to_string());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();

    log::info!("Macro host starting...");

    let config = match loaded {
        Ok(config) => {
            if config_path.exists() {
                log::info!("Loaded host configuration from {:?}", config_path);
            } else if let Err(e) = config.save(&config_path).await {
                log::warn!("Failed to write default config: {}", e);
            }
            config
        }
        Err(e) => {
            log::warn!("Failed to load config, using defaults: {}", e);
            HostConfig::default()
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&config.data_dir).await {
        log::error!(
            "Failed to create data directory {:?}: {}. Workflows will not persist.",
            config.data_dir,
            e
        );
    }
    let state: Arc<dyn StateBackend> = Arc::new(JsonFileBackend::new(&config.data_dir));

    let midi = Arc::new(LoopbackMidiBackend::new());
    let mut registry = MacroTypeRegistry::with_builtins();
    register_builtins(&mut registry, midi.clone() as Arc<dyn MidiBackend>);

    let resolver = Arc::new(DeviceResolver::with_persistence(state.clone()).await);
    if config.suggest_devices && resolver.configuration().logical_devices.is_empty() {
        match resolver.auto_configure_devices(midi.as_ref()).await {
            Ok(suggestion) => {
                for (logical, assignment) in &suggestion.suggested_assignments {
                    log::info!("Suggested device for '{}': {}", logical, assignment.device_name);
                }
            }
            Err(e) => log::warn!("Device auto-configuration failed: {}", e),
        }
    }

    let manager = WorkflowManager::new(Arc::new(registry), state, config.engine.clone());
    for template in builtin_templates(resolver) {
        manager.register_template(template);
    }

    let started = manager.initialize().await;
    log::info!("Macro host ready with {} running workflow(s)", started);

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }

    log::info!("Shutting down...");
    manager.destroy().await;
}
