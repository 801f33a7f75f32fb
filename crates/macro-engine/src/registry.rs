//! Macro type registry
//!
//! Maps macro type ids to their definition (ports, config schema,
//! category) and to the factory that builds live instances. Registries
//! are plain values: build one at startup, wrap it in an `Arc`, and pass
//! it to the validator and the workflow manager.
//!
//! Macro crates describe their types at link time:
//!
//! ```ignore
//! inventory::submit!(macro_engine::DescriptorFn(MyMacro::descriptor));
//! ```
//!
//! `MacroTypeRegistry::with_builtins()` collects every submitted
//! descriptor into a fresh registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MacroEngineError, Result};
use crate::node::{FnMacroFactory, MacroFactory, MacroInstance};
use crate::types::{MacroCategory, MacroTypeDefinition, NodeConfig};

/// Link-time registration of a macro type definition
pub struct DescriptorFn(pub fn() -> MacroTypeDefinition);

inventory::collect!(DescriptorFn);

/// A registration entry combining a definition with an optional factory
struct RegistryEntry {
    definition: MacroTypeDefinition,
    factory: Option<Arc<dyn MacroFactory>>,
}

/// Registry of macro types with their definitions and factories
pub struct MacroTypeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl MacroTypeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding every descriptor submitted via `inventory`.
    ///
    /// Only definitions are collected; factories are attached by the crate
    /// that owns the runtime collaborators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in inventory::iter::<DescriptorFn> {
            registry.register_definition((descriptor.0)());
        }
        log::debug!("Collected {} built-in macro types", registry.len());
        registry
    }

    /// Register a type with its factory. Replaces any previous entry.
    pub fn register(&mut self, definition: MacroTypeDefinition, factory: Arc<dyn MacroFactory>) {
        self.entries.insert(
            definition.id.clone(),
            RegistryEntry {
                definition,
                factory: Some(factory),
            },
        );
    }

    /// Register a type built by a synchronous constructor
    pub fn register_fn(
        &mut self,
        definition: MacroTypeDefinition,
        constructor: impl Fn(&NodeConfig) -> Result<Arc<dyn MacroInstance>> + Send + Sync + 'static,
    ) {
        self.register(definition, Arc::new(FnMacroFactory::new(constructor)));
    }

    /// Register a definition only (validation and palette listing)
    pub fn register_definition(&mut self, definition: MacroTypeDefinition) {
        self.entries.insert(
            definition.id.clone(),
            RegistryEntry {
                definition,
                factory: None,
            },
        );
    }

    /// Attach a factory to an already registered type.
    ///
    /// Returns false if the type is unknown.
    pub fn set_factory(&mut self, type_id: &str, factory: Arc<dyn MacroFactory>) -> bool {
        match self.entries.get_mut(type_id) {
            Some(entry) => {
                entry.factory = Some(factory);
                true
            }
            None => false,
        }
    }

    pub fn get_definition(&self, type_id: &str) -> Option<&MacroTypeDefinition> {
        self.entries.get(type_id).map(|e| &e.definition)
    }

    pub fn has_type(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    /// Whether instances of this type can be built
    pub fn can_instantiate(&self, type_id: &str) -> bool {
        self.entries
            .get(type_id)
            .map(|e| e.factory.is_some())
            .unwrap_or(false)
    }

    /// All definitions, ordered by type id
    pub fn definitions(&self) -> Vec<&MacroTypeDefinition> {
        let mut all: Vec<_> = self.entries.values().map(|e| &e.definition).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Definitions grouped by category
    pub fn definitions_by_category(&self) -> HashMap<MacroCategory, Vec<&MacroTypeDefinition>> {
        let mut grouped: HashMap<MacroCategory, Vec<&MacroTypeDefinition>> = HashMap::new();
        for definition in self.definitions() {
            grouped.entry(definition.category).or_default().push(definition);
        }
        grouped
    }

    pub fn type_ids(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same id.
    pub fn merge(&mut self, other: MacroTypeRegistry) {
        self.entries.extend(other.entries);
    }

    /// Build a live instance for a node
    pub async fn create_instance(&self, node: &NodeConfig) -> Result<Arc<dyn MacroInstance>> {
        let entry = self
            .entries
            .get(&node.macro_type)
            .ok_or_else(|| MacroEngineError::UnknownMacroType(node.macro_type.clone()))?;

        let factory = entry.factory.as_ref().ok_or_else(|| {
            MacroEngineError::instantiation(
                &node.id,
                format!("no factory registered for macro type '{}'", node.macro_type),
            )
        })?;

        factory.create(node).await
    }
}

impl Default for MacroTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PassthroughMacro;
    use crate::types::{ConfigSchema, PortDefinition, PortKind};

    fn test_definition(id: &str, category: MacroCategory) -> MacroTypeDefinition {
        MacroTypeDefinition {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            category,
            config_schema: ConfigSchema::default(),
            inputs: vec![PortDefinition::required("input", "Input", PortKind::Any)],
            outputs: vec![PortDefinition::optional("output", "Output", PortKind::Any)],
        }
    }

    fn inventory_test_macro() -> MacroTypeDefinition {
        test_definition("inventory_test_macro", MacroCategory::Utility)
    }

    inventory::submit!(DescriptorFn(inventory_test_macro));

    #[test]
    fn test_with_builtins_collects_submitted_descriptors() {
        let registry = MacroTypeRegistry::with_builtins();
        assert!(registry.has_type("inventory_test_macro"));
        assert!(!registry.can_instantiate("inventory_test_macro"));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = MacroTypeRegistry::new();
        registry.register_definition(test_definition("a", MacroCategory::Input));
        registry.register_definition(test_definition("a", MacroCategory::Output));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_definition("a").unwrap().category, MacroCategory::Output);
    }

    #[test]
    fn test_definitions_by_category() {
        let mut registry = MacroTypeRegistry::new();
        registry.register_definition(test_definition("in1", MacroCategory::Input));
        registry.register_definition(test_definition("in2", MacroCategory::Input));
        registry.register_definition(test_definition("out", MacroCategory::Output));

        let grouped = registry.definitions_by_category();
        assert_eq!(grouped[&MacroCategory::Input].len(), 2);
        assert_eq!(grouped[&MacroCategory::Output].len(), 1);
        assert!(!grouped.contains_key(&MacroCategory::Processor));
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = MacroTypeRegistry::new();
        base.register_definition(test_definition("a", MacroCategory::Input));

        let mut plugin = MacroTypeRegistry::new();
        plugin.register_definition(test_definition("a", MacroCategory::Utility));
        plugin.register_definition(test_definition("b", MacroCategory::Utility));

        base.merge(plugin);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get_definition("a").unwrap().category, MacroCategory::Utility);
    }

    #[test]
    fn test_create_instance() {
        let mut registry = MacroTypeRegistry::new();
        registry.register_fn(test_definition("pass", MacroCategory::Utility), |_| {
            Ok(Arc::new(PassthroughMacro::new("input", "output")))
        });
        registry.register_definition(test_definition("bare", MacroCategory::Utility));

        let node = NodeConfig::new("n1", "pass");
        let instance = tokio_test::block_on(registry.create_instance(&node)).unwrap();
        assert!(instance.ports().input("input").is_some());
        assert!(instance.ports().output("output").is_some());

        let unknown = tokio_test::block_on(registry.create_instance(&NodeConfig::new("n2", "nope")));
        assert!(matches!(unknown, Err(MacroEngineError::UnknownMacroType(t)) if t == "nope"));

        let bare = tokio_test::block_on(registry.create_instance(&NodeConfig::new("n3", "bare")));
        assert!(matches!(bare, Err(MacroEngineError::Instantiation { .. })));
    }
}
