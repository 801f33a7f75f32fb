//! Workflow manager: the lifecycle of stored definitions and their
//! running instances.
//!
//! Every mutation follows the same shape: take the state lock, build the
//! next definition map as a copy, persist it, swap it in, then rebuild the
//! affected instance. Events are emitted after the lock is released so a
//! handler may call back into the manager.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use parking_lot::RwLock;
use persistent_state::{create_persistent_state, PersistentState, StateBackend};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::connection::ConnectionManager;
use crate::error::{MacroEngineError, Result};
use crate::events::{EventBus, EventHandler, WorkflowEvent, WorkflowEventType};
use crate::instance::{build_instance, teardown_instance, InstanceSnapshot, WorkflowInstance};
use crate::registry::MacroTypeRegistry;
use crate::templates::{TemplateInfo, TemplateRegistry, WorkflowTemplate};
use crate::types::{now_ms, InstanceStatus, WorkflowDefinition};
use crate::validation::{
    ConnectionValidationResult, FlowTestResult, ValidationResult, ValidationRule, WorkflowValidator,
};

type DefinitionMap = IndexMap<String, WorkflowDefinition>;

#[derive(Default)]
struct ManagerState {
    definitions: DefinitionMap,
    instances: HashMap<String, WorkflowInstance>,
}

/// Outcome of reloading every running workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadSummary {
    pub reloaded: Vec<String>,
    /// Workflow id and the error that stopped its rebuild
    pub failed: Vec<(String, String)>,
}

/// Owns workflow definitions, their persistence and their live instances
pub struct WorkflowManager {
    registry: Arc<MacroTypeRegistry>,
    validator: WorkflowValidator,
    templates: RwLock<TemplateRegistry>,
    connections: ConnectionManager,
    events: EventBus,
    store: PersistentState<DefinitionMap>,
    state: Mutex<ManagerState>,
}

impl WorkflowManager {
    pub fn new(registry: Arc<MacroTypeRegistry>, backend: Arc<dyn StateBackend>, config: EngineConfig) -> Self {
        let store = create_persistent_state(backend, config.persistence_key.clone(), DefinitionMap::new());
        Self {
            validator: WorkflowValidator::new(registry.clone(), config.validation.clone()),
            registry,
            templates: RwLock::new(TemplateRegistry::new()),
            connections: ConnectionManager::new(config.connections.clone()),
            events: EventBus::new(),
            store,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn registry(&self) -> &MacroTypeRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &WorkflowValidator {
        &self.validator
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn register_template(&self, template: Arc<dyn WorkflowTemplate>) {
        log::debug!("Registered workflow template '{}'", template.id());
        self.templates.write().register(template);
    }

    pub fn templates(&self) -> Vec<TemplateInfo> {
        self.templates.read().list()
    }

    pub fn register_validation_rule(&self, rule: Arc<dyn ValidationRule>) {
        self.validator.register_rule(rule);
    }

    // --- Events ---

    pub fn on(&self, event_type: WorkflowEventType, handler: Arc<dyn EventHandler>) {
        self.events.on(event_type, handler);
    }

    pub fn off(&self, event_type: WorkflowEventType, handler: &Arc<dyn EventHandler>) -> bool {
        self.events.off(event_type, handler)
    }

    pub fn emit(&self, event: &WorkflowEvent) {
        self.events.emit(event);
    }

    // --- Lifecycle ---

    /// Load stored definitions and start every enabled one.
    ///
    /// A workflow that fails to build is kept in `error` status and does not
    /// stop the others. Returns the number of definitions loaded.
    pub async fn initialize(&self) -> usize {
        let mut failures = Vec::new();
        let loaded = {
            let mut state = self.state.lock().await;
            state.definitions = self.store.get_state().await;

            let enabled: Vec<WorkflowDefinition> =
                state.definitions.values().filter(|d| d.enabled).cloned().collect();
            for definition in enabled {
                if state.instances.contains_key(&definition.id) {
                    continue;
                }
                if let Err(e) = self.start_instance(&mut state, &definition).await {
                    failures.push(instance_failed(&definition.id, &e));
                }
            }
            state.definitions.len()
        };

        log::info!(
            "Workflow manager initialized: {} workflow(s), {} failed to start",
            loaded,
            failures.len()
        );
        for event in &failures {
            self.events.emit(event);
        }
        loaded
    }

    /// Tear down every instance and sever all connections
    pub async fn destroy(&self) {
        let instances: Vec<WorkflowInstance> = {
            let mut state = self.state.lock().await;
            state.instances.drain().map(|(_, instance)| instance).collect()
        };
        let count = instances.len();
        join_all(
            instances
                .into_iter()
                .map(|instance| teardown_instance(instance, &self.connections)),
        )
        .await;
        self.connections.destroy();
        log::info!("Workflow manager destroyed ({} instance(s) torn down)", count);
    }

    // --- Definitions ---

    /// Validate, store and (if enabled) start a new workflow.
    ///
    /// A build failure after a successful store still leaves the definition
    /// stored and the instance in `error` status; the error is returned.
    pub async fn create_workflow(&self, mut definition: WorkflowDefinition) -> Result<String> {
        let validation = self.validator.validate(&definition);
        if !validation.valid {
            return Err(MacroEngineError::Validation(validation));
        }

        let id = definition.id.clone();
        let outcome = {
            let mut state = self.state.lock().await;
            if state.definitions.contains_key(&id) {
                return Err(MacroEngineError::DuplicateId(id));
            }

            let now = now_ms();
            definition.created = now;
            definition.modified = now;

            let mut next = state.definitions.clone();
            next.insert(id.clone(), definition.clone());
            self.persist(&next).await?;
            state.definitions = next;

            if definition.enabled {
                self.start_instance(&mut state, &definition).await
            } else {
                Ok(())
            }
        };

        log::info!("Created workflow '{}' ({})", id, definition.name);
        self.events.emit(&WorkflowEvent::WorkflowCreated {
            workflow_id: id.clone(),
            timestamp: now_ms(),
        });
        self.finish(&id, outcome).map(|()| id)
    }

    /// Replace a definition and hot-reload its instance.
    ///
    /// The instance is rebuilt when the previous one was running or the new
    /// definition is enabled, so a running workflow keeps running across an
    /// update even if the new definition is disabled.
    ///
    /// The id, creation time and version are owned by the manager: the
    /// version is always the previous one plus one.
    pub async fn update_workflow(&self, id: &str, mut definition: WorkflowDefinition) -> Result<u64> {
        let (version, outcome) = {
            let mut state = self.state.lock().await;
            let existing = state
                .definitions
                .get(id)
                .ok_or_else(|| MacroEngineError::WorkflowNotFound(id.to_string()))?;

            definition.id = id.to_string();
            definition.version = existing.version + 1;
            definition.created = existing.created;
            definition.modified = now_ms();

            let validation = self.validator.validate(&definition);
            if !validation.valid {
                return Err(MacroEngineError::Validation(validation));
            }

            let was_running = state
                .instances
                .get(id)
                .is_some_and(|i| i.status() == InstanceStatus::Running);
            self.stop_instance(&mut state, id).await;

            let mut next = state.definitions.clone();
            next.insert(id.to_string(), definition.clone());
            self.persist(&next).await?;
            state.definitions = next;

            let outcome = if was_running || definition.enabled {
                self.start_instance(&mut state, &definition).await
            } else {
                Ok(())
            };
            (definition.version, outcome)
        };

        log::info!("Updated workflow '{}' to version {}", id, version);
        self.events.emit(&WorkflowEvent::WorkflowUpdated {
            workflow_id: id.to_string(),
            version,
            timestamp: now_ms(),
        });
        self.finish(id, outcome).map(|()| version)
    }

    /// Tear down the instance, then remove the stored definition
    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if !state.definitions.contains_key(id) {
                return Err(MacroEngineError::WorkflowNotFound(id.to_string()));
            }

            self.stop_instance(&mut state, id).await;

            let mut next = state.definitions.clone();
            next.shift_remove(id);
            self.persist(&next).await?;
            state.definitions = next;
        }

        log::info!("Deleted workflow '{}'", id);
        self.events.emit(&WorkflowEvent::WorkflowDeleted {
            workflow_id: id.to_string(),
            timestamp: now_ms(),
        });
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Option<WorkflowDefinition> {
        self.state.lock().await.definitions.get(id).cloned()
    }

    /// All stored definitions in creation order
    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.state.lock().await.definitions.values().cloned().collect()
    }

    /// Enable a workflow and start it. Enabling an enabled workflow does
    /// nothing and emits nothing.
    pub async fn enable_workflow(&self, id: &str) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock().await;
            let mut definition = state
                .definitions
                .get(id)
                .cloned()
                .ok_or_else(|| MacroEngineError::WorkflowNotFound(id.to_string()))?;
            if definition.enabled {
                log::debug!("Workflow '{}' already enabled", id);
                return Ok(());
            }

            definition.enabled = true;
            definition.modified = now_ms();
            let mut next = state.definitions.clone();
            next.insert(id.to_string(), definition.clone());
            self.persist(&next).await?;
            state.definitions = next;

            self.start_instance(&mut state, &definition).await
        };

        log::info!("Enabled workflow '{}'", id);
        self.events.emit(&WorkflowEvent::WorkflowEnabled {
            workflow_id: id.to_string(),
            timestamp: now_ms(),
        });
        self.finish(id, outcome)
    }

    /// Disable a workflow and tear its instance down. Disabling a disabled
    /// workflow with no instance does nothing and emits nothing; an instance
    /// kept alive by an update is torn down.
    pub async fn disable_workflow(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let mut definition = state
                .definitions
                .get(id)
                .cloned()
                .ok_or_else(|| MacroEngineError::WorkflowNotFound(id.to_string()))?;
            if !definition.enabled && !state.instances.contains_key(id) {
                log::debug!("Workflow '{}' already disabled", id);
                return Ok(());
            }

            self.stop_instance(&mut state, id).await;

            definition.enabled = false;
            definition.modified = now_ms();
            let mut next = state.definitions.clone();
            next.insert(id.to_string(), definition);
            self.persist(&next).await?;
            state.definitions = next;
        }

        log::info!("Disabled workflow '{}'", id);
        self.events.emit(&WorkflowEvent::WorkflowDisabled {
            workflow_id: id.to_string(),
            timestamp: now_ms(),
        });
        Ok(())
    }

    /// Rebuild a workflow's instance from its stored definition.
    ///
    /// Only acts when an instance exists (running or failed); a workflow
    /// without one is left alone.
    pub async fn reload_workflow(&self, id: &str) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock().await;
            let definition = state
                .definitions
                .get(id)
                .cloned()
                .ok_or_else(|| MacroEngineError::WorkflowNotFound(id.to_string()))?;
            if !state.instances.contains_key(id) {
                log::debug!("Workflow '{}' has no instance to reload", id);
                return Ok(());
            }

            self.stop_instance(&mut state, id).await;
            self.start_instance(&mut state, &definition).await
        };

        log::info!("Reloaded workflow '{}'", id);
        self.events.emit(&WorkflowEvent::WorkflowReloaded {
            workflow_id: id.to_string(),
            timestamp: now_ms(),
        });
        self.finish(id, outcome)
    }

    /// Reload every instance concurrently. One failure does not stop the
    /// others.
    pub async fn reload_all_workflows(&self) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state.instances.keys().cloned().collect();
            let mut targets = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(instance) = state.instances.remove(&id) else {
                    continue;
                };
                match state.definitions.get(&id).cloned() {
                    Some(definition) => targets.push((definition, instance)),
                    None => {
                        log::warn!("Instance '{}' has no stored definition, tearing down", id);
                        teardown_instance(instance, &self.connections).await;
                    }
                }
            }

            let rebuilt = join_all(targets.into_iter().map(|(definition, instance)| async move {
                teardown_instance(instance, &self.connections).await;
                let (instance, outcome) = build_instance(&definition, &self.registry, &self.connections).await;
                (definition.id, instance, outcome)
            }))
            .await;

            for (id, instance, outcome) in rebuilt {
                state.instances.insert(id.clone(), instance);
                match outcome {
                    Ok(()) => {
                        events.push(WorkflowEvent::WorkflowReloaded {
                            workflow_id: id.clone(),
                            timestamp: now_ms(),
                        });
                        summary.reloaded.push(id);
                    }
                    Err(e) => {
                        log::error!("Failed to reload workflow '{}': {}", id, e);
                        events.push(instance_failed(&id, &e));
                        summary.failed.push((id, e.to_string()));
                    }
                }
            }
        }

        log::info!(
            "Reloaded {} workflow(s), {} failed",
            summary.reloaded.len(),
            summary.failed.len()
        );
        for event in &events {
            self.events.emit(event);
        }
        summary
    }

    /// Expand a registered template and create the resulting workflow
    pub async fn create_workflow_from_template(&self, template_id: &str, config: &Value) -> Result<String> {
        let template = self
            .templates
            .read()
            .get(template_id)
            .ok_or_else(|| MacroEngineError::TemplateNotFound(template_id.to_string()))?;
        let definition = template.generate(config).await?;
        log::debug!(
            "Template '{}' produced workflow '{}' with {} node(s)",
            template_id,
            definition.id,
            definition.macros.len()
        );
        self.create_workflow(definition).await
    }

    // --- Validation ---

    pub fn validate_workflow(&self, definition: &WorkflowDefinition) -> ValidationResult {
        self.validator.validate(definition)
    }

    /// Validate a raw JSON document, shape first
    pub fn validate_workflow_value(&self, document: &Value) -> ValidationResult {
        self.validator.validate_value(document)
    }

    pub fn validate_connections(&self, definition: &WorkflowDefinition) -> ConnectionValidationResult {
        self.validator.validate_connections(definition)
    }

    pub async fn test_workflow(&self, definition: &WorkflowDefinition) -> FlowTestResult {
        self.validator.test_workflow(definition).await
    }

    // --- Instances ---

    pub async fn get_instance(&self, id: &str) -> Option<InstanceSnapshot> {
        let state = self.state.lock().await;
        state.instances.get(id).map(|i| i.snapshot(&self.connections))
    }

    /// Snapshots of every instance in `running` status
    pub async fn running_instances(&self) -> Vec<InstanceSnapshot> {
        let state = self.state.lock().await;
        let mut snapshots: Vec<InstanceSnapshot> = state
            .instances
            .values()
            .filter(|i| i.status() == InstanceStatus::Running)
            .map(|i| i.snapshot(&self.connections))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    // --- Internals ---

    async fn persist(&self, definitions: &DefinitionMap) -> Result<()> {
        self.store.set_state(definitions).await?;
        log::debug!("Persisted {} workflow definition(s)", definitions.len());
        Ok(())
    }

    async fn start_instance(&self, state: &mut ManagerState, definition: &WorkflowDefinition) -> Result<()> {
        self.stop_instance(state, &definition.id).await;

        let (instance, outcome) = build_instance(definition, &self.registry, &self.connections).await;
        match &outcome {
            Ok(()) => log::info!(
                "Workflow '{}' running: {} node(s), {} connection(s)",
                definition.id,
                definition.macros.len(),
                instance.connection_ids().len()
            ),
            Err(e) => log::error!("Failed to build workflow '{}': {}", definition.id, e),
        }
        state.instances.insert(definition.id.clone(), instance);
        outcome
    }

    async fn stop_instance(&self, state: &mut ManagerState, id: &str) {
        if let Some(instance) = state.instances.remove(id) {
            if !teardown_instance(instance, &self.connections).await {
                log::warn!("Workflow '{}' did not tear down cleanly", id);
            }
        }
    }

    /// Emit the failure event for a build error, then hand the outcome back
    fn finish(&self, id: &str, outcome: Result<()>) -> Result<()> {
        if let Err(e) = &outcome {
            self.events.emit(&instance_failed(id, e));
        }
        outcome
    }
}

fn instance_failed(id: &str, error: &MacroEngineError) -> WorkflowEvent {
    WorkflowEvent::InstanceFailed {
        workflow_id: id.to_string(),
        error: error.to_string(),
        timestamp: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventError, VecEventSink};
    use crate::node::{MacroPorts, PassthroughMacro};
    use crate::types::{
        ConfigSchema, ConnectionConfig, MacroCategory, MacroTypeDefinition, NodeConfig, PortDefinition, PortKind,
    };
    use async_trait::async_trait;
    use persistent_state::MemoryBackend;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn macro_type(id: &str) -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            category: MacroCategory::Utility,
            config_schema: ConfigSchema::default(),
            inputs: vec![PortDefinition::optional("default", "In", PortKind::Any)],
            outputs: vec![PortDefinition::optional("default", "Out", PortKind::Any)],
        }
    }

    fn registry() -> Arc<MacroTypeRegistry> {
        let mut registry = MacroTypeRegistry::new();
        registry.register_fn(macro_type("pass"), |_| {
            Ok(Arc::new(PassthroughMacro::new("default", "default")))
        });
        registry.register_fn(macro_type("broken"), |node| {
            Err(MacroEngineError::instantiation(&node.id, "device missing"))
        });
        Arc::new(registry)
    }

    fn manager_with(backend: Arc<dyn StateBackend>) -> WorkflowManager {
        WorkflowManager::new(registry(), backend, EngineConfig::default())
    }

    fn manager() -> WorkflowManager {
        manager_with(Arc::new(MemoryBackend::new()))
    }

    fn chain(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(id, "Chain")
            .with_macro(NodeConfig::new("a", "pass"))
            .with_macro(NodeConfig::new("b", "pass"))
            .with_connection(ConnectionConfig::new("ab", "a", "b"))
    }

    fn record(manager: &WorkflowManager, types: &[WorkflowEventType]) -> Arc<VecEventSink> {
        let sink = Arc::new(VecEventSink::new());
        for event_type in types {
            manager.on(*event_type, sink.clone());
        }
        sink
    }

    #[tokio::test]
    async fn test_create_starts_enabled_workflow() {
        let manager = manager();
        let sink = record(&manager, &[WorkflowEventType::WorkflowCreated]);

        let id = manager.create_workflow(chain("wf")).await.unwrap();
        assert_eq!(id, "wf");

        let stored = manager.get_workflow("wf").await.unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.created > 0);

        let instance = manager.get_instance("wf").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.connections.len(), 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_workflow_has_no_instance() {
        let manager = manager();
        manager.create_workflow(chain("wf").with_enabled(false)).await.unwrap();
        assert!(manager.get_instance("wf").await.is_none());
        assert!(manager.running_instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let manager = manager();
        manager.create_workflow(chain("wf")).await.unwrap();

        let err = manager
            .create_workflow(chain("wf").with_description("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, MacroEngineError::DuplicateId(ref id) if id == "wf"));
        assert!(manager.get_workflow("wf").await.unwrap().description.is_none());
    }

    #[tokio::test]
    async fn test_invalid_definition_not_stored() {
        let manager = manager();
        let def = WorkflowDefinition::new("wf", "Bad").with_macro(NodeConfig::new("x", "nope"));

        let err = manager.create_workflow(def).await.unwrap_err();
        match err {
            MacroEngineError::Validation(result) => assert!(!result.errors.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.list_workflows().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_preserves_creation_order() {
        let manager = manager();
        for id in ["c", "a", "b"] {
            manager.create_workflow(chain(id)).await.unwrap();
        }
        let ids: Vec<_> = manager.list_workflows().await.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_hot_reloads() {
        let manager = manager();
        let sink = record(&manager, &[WorkflowEventType::WorkflowUpdated]);
        manager.create_workflow(chain("wf")).await.unwrap();

        let mut next = chain("ignored")
            .with_macro(NodeConfig::new("c", "pass"))
            .with_connection(ConnectionConfig::new("bc", "b", "c"));
        next.version = 42;

        let version = manager.update_workflow("wf", next).await.unwrap();
        assert_eq!(version, 2);

        let stored = manager.get_workflow("wf").await.unwrap();
        assert_eq!(stored.id, "wf");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.macros.len(), 3);

        // Exactly one instance, built from the new definition
        let running = manager.running_instances().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].definition.version, 2);
        assert_eq!(running[0].node_ids, vec!["a", "b", "c"]);
        assert_eq!(manager.connection_manager().get_all_connections().len(), 2);

        match &sink.events()[0] {
            WorkflowEvent::WorkflowUpdated { version, .. } => assert_eq!(*version, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_keeps_running_instance_when_disabled() {
        let manager = manager();
        manager.create_workflow(chain("wf")).await.unwrap();

        let next = chain("wf")
            .with_macro(NodeConfig::new("c", "pass"))
            .with_connection(ConnectionConfig::new("bc", "b", "c"))
            .with_enabled(false);
        manager.update_workflow("wf", next.clone()).await.unwrap();
        manager.update_workflow("wf", next).await.unwrap();

        let stored = manager.get_workflow("wf").await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.version, 3);

        let running = manager.running_instances().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].definition.version, 3);
        assert_eq!(running[0].node_ids, vec!["a", "b", "c"]);
        assert_eq!(manager.connection_manager().get_all_connections().len(), 2);

        // Disabling still tears it down once
        let sink = record(&manager, &[WorkflowEventType::WorkflowDisabled]);
        manager.disable_workflow("wf").await.unwrap();
        manager.disable_workflow("wf").await.unwrap();
        assert_eq!(sink.events().len(), 1);
        assert!(manager.get_instance("wf").await.is_none());
    }

    #[tokio::test]
    async fn test_update_of_stopped_disabled_workflow_stays_stopped() {
        let manager = manager();
        manager.create_workflow(chain("wf").with_enabled(false)).await.unwrap();
        manager
            .update_workflow("wf", chain("wf").with_enabled(false))
            .await
            .unwrap();
        assert!(manager.get_instance("wf").await.is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_workflow() {
        let manager = manager();
        let err = manager.update_workflow("ghost", chain("ghost")).await.unwrap_err();
        assert!(matches!(err, MacroEngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_running_instance() {
        let manager = manager();
        manager.create_workflow(chain("wf")).await.unwrap();

        let bad = WorkflowDefinition::new("wf", "Bad").with_macro(NodeConfig::new("x", "nope"));
        assert!(manager.update_workflow("wf", bad).await.is_err());

        assert_eq!(manager.get_workflow("wf").await.unwrap().version, 1);
        assert_eq!(manager.running_instances().await.len(), 1);
    }

    #[tokio::test]
    async fn test_enable_disable_are_idempotent() {
        let manager = manager();
        let sink = record(
            &manager,
            &[WorkflowEventType::WorkflowEnabled, WorkflowEventType::WorkflowDisabled],
        );
        manager.create_workflow(chain("wf")).await.unwrap();

        manager.enable_workflow("wf").await.unwrap();
        assert!(sink.events().is_empty());

        manager.disable_workflow("wf").await.unwrap();
        manager.disable_workflow("wf").await.unwrap();
        assert_eq!(sink.events_of(WorkflowEventType::WorkflowDisabled).len(), 1);
        assert!(manager.get_instance("wf").await.is_none());
        assert!(!manager.get_workflow("wf").await.unwrap().enabled);

        manager.enable_workflow("wf").await.unwrap();
        manager.enable_workflow("wf").await.unwrap();
        assert_eq!(sink.events_of(WorkflowEventType::WorkflowEnabled).len(), 1);
        assert_eq!(manager.running_instances().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_tears_down() {
        let manager = manager();
        manager.create_workflow(chain("wf")).await.unwrap();

        manager.delete_workflow("wf").await.unwrap();
        assert!(manager.get_workflow("wf").await.is_none());
        assert!(manager.get_instance("wf").await.is_none());
        assert!(manager.connection_manager().get_all_connections().is_empty());

        let err = manager.delete_workflow("wf").await.unwrap_err();
        assert!(matches!(err, MacroEngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_build_failure_recorded() {
        let manager = manager();
        let sink = record(&manager, &[WorkflowEventType::InstanceFailed]);
        let def = chain("wf").with_macro(NodeConfig::new("dev", "broken"));

        let err = manager.create_workflow(def).await.unwrap_err();
        assert!(matches!(err, MacroEngineError::Instantiation { .. }));

        // Stored, but failed
        assert!(manager.get_workflow("wf").await.is_some());
        let instance = manager.get_instance("wf").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert!(instance.last_error.unwrap().contains("device missing"));
        assert!(manager.running_instances().await.is_empty());
        assert_eq!(sink.events().len(), 1);

        // Reload retries, and fails the same way
        assert!(manager.reload_workflow("wf").await.is_err());
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_reload_without_instance_is_noop() {
        let manager = manager();
        let sink = record(&manager, &[WorkflowEventType::WorkflowReloaded]);
        manager.create_workflow(chain("wf").with_enabled(false)).await.unwrap();

        manager.reload_workflow("wf").await.unwrap();
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_reload_all_isolates_failures() {
        let manager = manager();
        manager.create_workflow(chain("good")).await.unwrap();
        let _ = manager
            .create_workflow(chain("bad").with_macro(NodeConfig::new("dev", "broken")))
            .await;

        let summary = manager.reload_all_workflows().await;
        assert_eq!(summary.reloaded, vec!["good"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "bad");
        assert_eq!(manager.running_instances().await.len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_restores_workflows() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        {
            let first = manager_with(backend.clone());
            first.create_workflow(chain("on")).await.unwrap();
            first.create_workflow(chain("off").with_enabled(false)).await.unwrap();
            first.destroy().await;
        }

        let second = manager_with(backend);
        assert_eq!(second.initialize().await, 2);
        let running = second.running_instances().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "on");
        assert_eq!(second.get_workflow("off").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_abort_mutation() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        manager.on(
            WorkflowEventType::WorkflowCreated,
            Arc::new(move |_: &WorkflowEvent| -> std::result::Result<(), EventError> {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(EventError::new("handler broke"))
            }),
        );

        manager.create_workflow(chain("wf")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.get_workflow("wf").await.is_some());
    }

    struct SingleNode;

    #[async_trait]
    impl WorkflowTemplate for SingleNode {
        fn id(&self) -> &str {
            "single"
        }

        fn name(&self) -> &str {
            "Single node"
        }

        fn description(&self) -> &str {
            "One passthrough node"
        }

        async fn generate(&self, config: &Value) -> Result<WorkflowDefinition> {
            let id = config.get("workflowId").and_then(Value::as_str).unwrap_or("single");
            Ok(WorkflowDefinition::new(id, "Single").with_macro(NodeConfig::new("only", "pass")))
        }
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let manager = manager();
        manager.register_template(Arc::new(SingleNode));
        assert_eq!(manager.templates().len(), 1);

        let id = manager
            .create_workflow_from_template("single", &json!({"workflowId": "from-template"}))
            .await
            .unwrap();
        assert_eq!(id, "from-template");
        assert_eq!(manager.running_instances().await.len(), 1);

        let err = manager
            .create_workflow_from_template("missing", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MacroEngineError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn test_data_flows_through_running_instance() {
        let manager = manager();
        manager.create_workflow(chain("wf")).await.unwrap();

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let state = manager.state.lock().await;
        let instance = state.instances.get("wf").unwrap();
        let sink = received.clone();
        let _subscription = instance
            .node("b")
            .unwrap()
            .ports()
            .output("default")
            .unwrap()
            .subscribe(move |value| sink.lock().push(value.clone()));

        let source: &MacroPorts = instance.node("a").unwrap().ports();
        source.input("default").unwrap().push(json!(64)).unwrap();
        drop(state);

        assert_eq!(*received.lock(), vec![json!(64)]);
    }

    #[tokio::test]
    async fn test_destroy_releases_everything() {
        let manager = manager();
        manager.create_workflow(chain("a")).await.unwrap();
        manager.create_workflow(chain("b")).await.unwrap();

        manager.destroy().await;
        assert!(manager.running_instances().await.is_empty());
        assert!(manager.connection_manager().is_destroyed());
        // Definitions survive teardown
        assert_eq!(manager.list_workflows().await.len(), 2);
    }
}
