//! Live macro instances and their construction contract

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::{InputSink, OutputStream};
use crate::types::NodeConfig;

/// Named input sinks and output streams of one macro instance
#[derive(Clone, Default)]
pub struct MacroPorts {
    inputs: HashMap<String, InputSink>,
    outputs: HashMap<String, OutputStream>,
}

impl MacroPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, port: impl Into<String>, sink: InputSink) -> Self {
        self.inputs.insert(port.into(), sink);
        self
    }

    pub fn with_output(mut self, port: impl Into<String>, stream: OutputStream) -> Self {
        self.outputs.insert(port.into(), stream);
        self
    }

    pub fn input(&self, port: &str) -> Option<&InputSink> {
        self.inputs.get(port)
    }

    pub fn output(&self, port: &str) -> Option<&OutputStream> {
        self.outputs.get(port)
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.keys().map(|k| k.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.keys().map(|k| k.as_str()).collect()
    }
}

/// A running macro
///
/// Ports are wired once, during instance build. `destroy` releases any
/// external resources; the default does nothing.
#[async_trait]
pub trait MacroInstance: Send + Sync {
    fn ports(&self) -> &MacroPorts;

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds instances of one macro type from node configuration
#[async_trait]
pub trait MacroFactory: Send + Sync {
    async fn create(&self, node: &NodeConfig) -> Result<Arc<dyn MacroInstance>>;
}

/// Factory wrapping a synchronous constructor function
pub struct FnMacroFactory {
    constructor: Box<dyn Fn(&NodeConfig) -> Result<Arc<dyn MacroInstance>> + Send + Sync>,
}

impl FnMacroFactory {
    pub fn new(
        constructor: impl Fn(&NodeConfig) -> Result<Arc<dyn MacroInstance>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            constructor: Box::new(constructor),
        }
    }
}

#[async_trait]
impl MacroFactory for FnMacroFactory {
    async fn create(&self, node: &NodeConfig) -> Result<Arc<dyn MacroInstance>> {
        (self.constructor)(node)
    }
}

/// A node id bound to its live instance
#[derive(Clone)]
pub struct MacroNode {
    pub id: String,
    pub instance: Arc<dyn MacroInstance>,
}

impl MacroNode {
    pub fn new(id: impl Into<String>, instance: Arc<dyn MacroInstance>) -> Self {
        Self {
            id: id.into(),
            instance,
        }
    }

    pub fn ports(&self) -> &MacroPorts {
        self.instance.ports()
    }
}

impl std::fmt::Debug for MacroNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacroNode").field("id", &self.id).finish()
    }
}

/// A macro that re-emits every input on its output. Handy for tests and
/// as a routing utility.
pub struct PassthroughMacro {
    ports: MacroPorts,
}

impl PassthroughMacro {
    pub fn new(input_port: &str, output_port: &str) -> Self {
        let output = OutputStream::new();
        Self {
            ports: MacroPorts::new()
                .with_input(input_port, InputSink::forward_to(output.clone()))
                .with_output(output_port, output),
        }
    }
}

#[async_trait]
impl MacroInstance for PassthroughMacro {
    fn ports(&self) -> &MacroPorts {
        &self.ports
    }
}
