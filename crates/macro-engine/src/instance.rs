//! Running workflow instances: build and teardown

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::error::{MacroEngineError, Result};
use crate::node::MacroNode;
use crate::registry::MacroTypeRegistry;
use crate::types::{now_ms, ConnectionHandle, InstanceStatus, WorkflowDefinition};

/// Connection ids are scoped per workflow inside the shared manager
pub fn scoped_connection_id(workflow_id: &str, connection_id: &str) -> String {
    format!("{}:{}", workflow_id, connection_id)
}

/// The live counterpart of an enabled workflow definition
pub struct WorkflowInstance {
    definition: WorkflowDefinition,
    status: InstanceStatus,
    nodes: IndexMap<String, MacroNode>,
    connection_ids: Vec<String>,
    created: i64,
    last_updated: i64,
    last_error: Option<String>,
}

impl WorkflowInstance {
    fn new(definition: WorkflowDefinition) -> Self {
        let now = now_ms();
        Self {
            definition,
            status: InstanceStatus::Initializing,
            nodes: IndexMap::new(),
            connection_ids: Vec::new(),
            created: now,
            last_updated: now,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// The definition snapshot this instance was built from
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn node(&self, node_id: &str) -> Option<&MacroNode> {
        self.nodes.get(node_id)
    }

    pub fn connection_ids(&self) -> &[String] {
        &self.connection_ids
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn set_status(&mut self, next: InstanceStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
            self.last_updated = now_ms();
        } else {
            log::warn!(
                "Ignoring status change {:?} -> {:?} for workflow '{}'",
                self.status,
                next,
                self.id()
            );
        }
    }

    fn fail(&mut self, error: String) {
        self.last_error = Some(error);
        if self.status != InstanceStatus::Error {
            self.set_status(InstanceStatus::Error);
        }
    }

    /// Read-only view including live connection data
    pub fn snapshot(&self, connections: &ConnectionManager) -> InstanceSnapshot {
        let mut metrics = InstanceMetrics::default();
        let mut handles = Vec::with_capacity(self.connection_ids.len());
        let mut latency_total = 0.0;

        for id in &self.connection_ids {
            if let Some(handle) = connections.get_connection(id) {
                handles.push(handle);
            }
            if let Some(health) = connections.get_connection_health(id) {
                metrics.event_count += health.event_count;
                metrics.error_count += health.error_count;
                latency_total += health.latency_ms * health.event_count as f64;
                if !health.healthy {
                    metrics.unhealthy_connections += 1;
                }
            }
        }
        if metrics.event_count > 0 {
            metrics.average_latency_ms = latency_total / metrics.event_count as f64;
        }

        InstanceSnapshot {
            id: self.id().to_string(),
            status: self.status,
            definition: self.definition.clone(),
            node_ids: self.nodes.keys().cloned().collect(),
            connections: handles,
            metrics,
            created: self.created,
            last_updated: self.last_updated,
            last_error: self.last_error.clone(),
        }
    }
}

/// Per-instance metrics aggregated from its connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetrics {
    pub event_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
    pub unhealthy_connections: usize,
}

/// Serializable view of a workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: String,
    pub status: InstanceStatus,
    pub definition: WorkflowDefinition,
    pub node_ids: Vec<String>,
    pub connections: Vec<ConnectionHandle>,
    pub metrics: InstanceMetrics,
    pub created: i64,
    pub last_updated: i64,
    pub last_error: Option<String>,
}

/// Build an instance: nodes in declared order, then connections in
/// declared order.
///
/// The instance is returned even when a step fails, in `error` status,
/// so the failure stays inspectable.
pub(crate) async fn build_instance(
    definition: &WorkflowDefinition,
    registry: &MacroTypeRegistry,
    connections: &ConnectionManager,
) -> (WorkflowInstance, Result<()>) {
    let mut instance = WorkflowInstance::new(definition.clone());
    let outcome = wire(&mut instance, definition, registry, connections).await;

    match &outcome {
        Ok(()) => instance.set_status(InstanceStatus::Running),
        Err(e) => instance.fail(e.to_string()),
    }
    (instance, outcome)
}

async fn wire(
    instance: &mut WorkflowInstance,
    definition: &WorkflowDefinition,
    registry: &MacroTypeRegistry,
    connections: &ConnectionManager,
) -> Result<()> {
    for node in &definition.macros {
        if !node.is_enabled() {
            log::debug!("Skipping disabled node '{}'", node.id);
            continue;
        }
        let live = registry.create_instance(node).await?;
        instance.nodes.insert(node.id.clone(), MacroNode::new(&node.id, live));
    }

    for conn in &definition.connections {
        if !conn.is_enabled() {
            log::debug!("Skipping disabled connection '{}'", conn.id);
            continue;
        }

        let source = instance.nodes.get(&conn.source_node_id);
        let target = instance.nodes.get(&conn.target_node_id);
        let (Some(source), Some(target)) = (source, target) else {
            let declared =
                definition.node(&conn.source_node_id).is_some() && definition.node(&conn.target_node_id).is_some();
            if declared {
                log::debug!("Skipping connection '{}' to a disabled node", conn.id);
                continue;
            }
            return Err(MacroEngineError::instantiation(
                &conn.id,
                "connection references a node that does not exist",
            ));
        };

        let scoped = scoped_connection_id(&definition.id, &conn.id);
        connections.create_connection(&scoped, source, &conn.source_output, target, &conn.target_input)?;
        instance.connection_ids.push(scoped);
    }

    Ok(())
}

/// Tear an instance down: disconnect everything, then destroy every node.
///
/// Never gets stuck: failures are logged, the instance is still fully
/// released. Returns whether every step succeeded.
pub(crate) async fn teardown_instance(mut instance: WorkflowInstance, connections: &ConnectionManager) -> bool {
    for id in instance.connection_ids.drain(..) {
        connections.disconnect_connection(&id);
    }

    let mut clean = true;
    let nodes: Vec<MacroNode> = instance.nodes.drain(..).map(|(_, node)| node).collect();
    for node in nodes {
        if let Err(e) = node.instance.destroy().await {
            log::warn!(
                "Failed to destroy node '{}' of workflow '{}': {}",
                node.id,
                instance.id(),
                e
            );
            clean = false;
        }
    }

    if !clean {
        instance.fail("teardown did not complete cleanly".to_string());
    }
    instance.set_status(InstanceStatus::Destroyed);
    log::debug!("Tore down workflow instance '{}'", instance.id());
    clean
}
