//! Workflow lifecycle events
//!
//! The workflow manager emits an event after each successful mutation.
//! Handlers are registered per event type; a failing or panicking handler
//! is logged and never stops the others or the emitting operation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Discriminant of a `WorkflowEvent`, used to subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    WorkflowCreated,
    WorkflowUpdated,
    WorkflowDeleted,
    WorkflowEnabled,
    WorkflowDisabled,
    WorkflowReloaded,
    InstanceFailed,
}

/// Events emitted by the workflow manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    #[serde(rename_all = "camelCase")]
    WorkflowCreated { workflow_id: String, timestamp: i64 },

    #[serde(rename_all = "camelCase")]
    WorkflowUpdated {
        workflow_id: String,
        version: u64,
        timestamp: i64,
    },

    #[serde(rename_all = "camelCase")]
    WorkflowDeleted { workflow_id: String, timestamp: i64 },

    #[serde(rename_all = "camelCase")]
    WorkflowEnabled { workflow_id: String, timestamp: i64 },

    #[serde(rename_all = "camelCase")]
    WorkflowDisabled { workflow_id: String, timestamp: i64 },

    /// A running instance was rebuilt from its stored definition
    #[serde(rename_all = "camelCase")]
    WorkflowReloaded { workflow_id: String, timestamp: i64 },

    /// Building an instance failed; the instance is kept in `error` status
    #[serde(rename_all = "camelCase")]
    InstanceFailed {
        workflow_id: String,
        error: String,
        timestamp: i64,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> WorkflowEventType {
        match self {
            Self::WorkflowCreated { .. } => WorkflowEventType::WorkflowCreated,
            Self::WorkflowUpdated { .. } => WorkflowEventType::WorkflowUpdated,
            Self::WorkflowDeleted { .. } => WorkflowEventType::WorkflowDeleted,
            Self::WorkflowEnabled { .. } => WorkflowEventType::WorkflowEnabled,
            Self::WorkflowDisabled { .. } => WorkflowEventType::WorkflowDisabled,
            Self::WorkflowReloaded { .. } => WorkflowEventType::WorkflowReloaded,
            Self::InstanceFailed { .. } => WorkflowEventType::InstanceFailed,
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowCreated { workflow_id, .. }
            | Self::WorkflowUpdated { workflow_id, .. }
            | Self::WorkflowDeleted { workflow_id, .. }
            | Self::WorkflowEnabled { workflow_id, .. }
            | Self::WorkflowDisabled { workflow_id, .. }
            | Self::WorkflowReloaded { workflow_id, .. }
            | Self::InstanceFailed { workflow_id, .. } => workflow_id,
        }
    }
}

/// Error returned by a handler
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Receives workflow events
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &WorkflowEvent) -> Result<(), EventError>;
}

impl<F> EventHandler for F
where
    F: Fn(&WorkflowEvent) -> Result<(), EventError> + Send + Sync,
{
    fn handle(&self, event: &WorkflowEvent) -> Result<(), EventError> {
        self(event)
    }
}

/// Handlers keyed by event type
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<WorkflowEventType, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one event type
    pub fn on(&self, event_type: WorkflowEventType, handler: Arc<dyn EventHandler>) {
        self.handlers.write().entry(event_type).or_default().push(handler);
    }

    /// Remove a handler previously passed to `on`. Returns whether it was found.
    pub fn off(&self, event_type: WorkflowEventType, handler: &Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        before != list.len()
    }

    /// Deliver an event to every handler of its type
    pub fn emit(&self, event: &WorkflowEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .get(&event.event_type())
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("Handler for {:?} failed: {}", event.event_type(), e);
                }
                Err(_) => {
                    log::error!("Handler for {:?} panicked", event.event_type());
                }
            }
        }
    }

    pub fn handler_count(&self, event_type: WorkflowEventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

/// A vector-based handler that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Collected events of one type
    pub fn events_of(&self, event_type: WorkflowEventType) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventHandler for VecEventSink {
    fn handle(&self, event: &WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
