//! The closed set of built-in macros and their factories

use std::sync::Arc;

use async_trait::async_trait;
use macro_engine::{
    MacroDescriptor, MacroFactory, MacroInstance, MacroTypeDefinition, MacroTypeRegistry, NodeConfig, Result,
};

use crate::backend::MidiBackend;
use crate::input::{MidiControlInput, MidiInput};
use crate::output::{MidiControlOutput, MidiOutput};
use crate::processing::ValueMapper;

/// Every macro type this crate provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMacro {
    MidiControlInput,
    MidiInput,
    MidiControlOutput,
    MidiOutput,
    ValueMapper,
}

impl BuiltinMacro {
    pub const ALL: [BuiltinMacro; 5] = [
        Self::MidiControlInput,
        Self::MidiInput,
        Self::MidiControlOutput,
        Self::MidiOutput,
        Self::ValueMapper,
    ];

    pub fn type_id(self) -> &'static str {
        match self {
            Self::MidiControlInput => MidiControlInput::TYPE_ID,
            Self::MidiInput => MidiInput::TYPE_ID,
            Self::MidiControlOutput => MidiControlOutput::TYPE_ID,
            Self::MidiOutput => MidiOutput::TYPE_ID,
            Self::ValueMapper => ValueMapper::TYPE_ID,
        }
    }

    pub fn from_type_id(type_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.type_id() == type_id)
    }

    pub fn descriptor(self) -> MacroTypeDefinition {
        match self {
            Self::MidiControlInput => MidiControlInput::descriptor(),
            Self::MidiInput => MidiInput::descriptor(),
            Self::MidiControlOutput => MidiControlOutput::descriptor(),
            Self::MidiOutput => MidiOutput::descriptor(),
            Self::ValueMapper => ValueMapper::descriptor(),
        }
    }

    /// Build a live instance for a node of this type
    pub fn instantiate(self, node: &NodeConfig, backend: &Arc<dyn MidiBackend>) -> Result<Arc<dyn MacroInstance>> {
        let instance: Arc<dyn MacroInstance> = match self {
            Self::MidiControlInput => Arc::new(MidiControlInput::new(node, backend.as_ref())?),
            Self::MidiInput => Arc::new(MidiInput::new(node, backend.as_ref())?),
            Self::MidiControlOutput => Arc::new(MidiControlOutput::new(node, backend.clone())?),
            Self::MidiOutput => Arc::new(MidiOutput::new(node, backend.clone())?),
            Self::ValueMapper => Arc::new(ValueMapper::new(node)?),
        };
        Ok(instance)
    }
}

/// Registry factory for one built-in macro type
pub struct BuiltinFactory {
    kind: BuiltinMacro,
    backend: Arc<dyn MidiBackend>,
}

impl BuiltinFactory {
    pub fn new(kind: BuiltinMacro, backend: Arc<dyn MidiBackend>) -> Self {
        Self { kind, backend }
    }
}

#[async_trait]
impl MacroFactory for BuiltinFactory {
    async fn create(&self, node: &NodeConfig) -> Result<Arc<dyn MacroInstance>> {
        self.kind.instantiate(node, &self.backend)
    }
}

/// Register every built-in macro, with factories bound to `backend`
pub fn register_builtins(registry: &mut MacroTypeRegistry, backend: Arc<dyn MidiBackend>) {
    for kind in BuiltinMacro::ALL {
        registry.register(kind.descriptor(), Arc::new(BuiltinFactory::new(kind, backend.clone())));
    }
    log::debug!("Registered {} built-in macro factories", BuiltinMacro::ALL.len());
}
