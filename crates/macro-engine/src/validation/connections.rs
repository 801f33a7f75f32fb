//! Connection graph analysis: references, cycles, reachability and
//! performance heuristics.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::{IssueKind, ValidationIssue};
use crate::config::ValidationLimits;
use crate::types::WorkflowDefinition;

/// Severity of a performance finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical findings block the workflow
    pub fn is_blocking(self) -> bool {
        self >= Severity::High
    }
}

/// A raw performance finding, positioned for graph editors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    /// Node the finding is about; `None` for whole-graph findings
    pub node_id: Option<String>,
    pub severity: Severity,
    pub current_value: f64,
    pub threshold: f64,
    pub unit: String,
}

/// Result of `validate_connections`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Each cycle as the node ids along it, closing on the first
    pub cycles: Vec<Vec<String>>,
    pub unreachable_nodes: Vec<String>,
    pub performance_issues: Vec<PerformanceIssue>,
}

/// Analyse the connections of a definition
pub fn validate_connections(
    definition: &WorkflowDefinition,
    limits: &ValidationLimits,
) -> ConnectionValidationResult {
    let mut result = ConnectionValidationResult::default();
    let node_ids: Vec<&str> = definition.macros.iter().map(|n| n.id.as_str()).collect();
    let known: HashSet<&str> = node_ids.iter().copied().collect();

    // Adjacency over well-formed, non-self edges
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    // Every well-formed outgoing edge, self-loops included
    let mut outgoing: HashMap<&str, usize> = HashMap::new();

    for conn in &definition.connections {
        let mut dangling = false;
        for (field, node_id) in [
            ("sourceNodeId", &conn.source_node_id),
            ("targetNodeId", &conn.target_node_id),
        ] {
            if !known.contains(node_id.as_str()) {
                dangling = true;
                result.errors.push(
                    ValidationIssue::new(
                        IssueKind::Connection,
                        format!(
                            "Connection '{}' references unknown node '{}'",
                            conn.id, node_id
                        ),
                    )
                    .with_connection(&conn.id)
                    .with_field(field)
                    .with_suggestion("Point the connection at an existing node or remove it"),
                );
            }
        }
        if dangling {
            continue;
        }
        *outgoing.entry(conn.source_node_id.as_str()).or_default() += 1;

        if conn.is_self_loop() {
            result.warnings.push(
                ValidationIssue::new(
                    IssueKind::BestPractice,
                    format!(
                        "Connection '{}' connects node '{}' to itself",
                        conn.id, conn.source_node_id
                    ),
                )
                .with_connection(&conn.id)
                .with_node(&conn.source_node_id)
                .with_suggestion("Self-connections can cause feedback; route through another node"),
            );
            continue;
        }

        adjacency
            .entry(conn.source_node_id.as_str())
            .or_default()
            .push(conn.target_node_id.as_str());
        *incoming.entry(conn.target_node_id.as_str()).or_default() += 1;
    }

    result.cycles = find_cycles(&node_ids, &adjacency);
    if !result.cycles.is_empty() {
        result.errors.push(
            ValidationIssue::new(
                IssueKind::Connection,
                format!("Detected {} cycle(s)", result.cycles.len()),
            )
            .with_field("connections")
            .with_suggestion("Remove a connection from each cycle so data flows one way"),
        );
    }

    result.unreachable_nodes = find_unreachable(&node_ids, &adjacency, &incoming);
    for node_id in &result.unreachable_nodes {
        result.warnings.push(
            ValidationIssue::new(
                IssueKind::Connection,
                format!("Node '{}' is not reachable from any input", node_id),
            )
            .with_node(node_id)
            .with_suggestion("Connect the node to an input path or remove it"),
        );
    }

    result.performance_issues = performance_issues(definition, &node_ids, &outgoing, limits);
    for issue in &result.performance_issues {
        let validation_issue = performance_to_issue(issue);
        if issue.severity.is_blocking() {
            result.errors.push(validation_issue);
        } else {
            result.warnings.push(validation_issue);
        }
    }

    result.valid = result.errors.is_empty();
    result
}

/// Depth-first search collecting every back edge as a cycle.
///
/// Iterative with an explicit frame stack so long chains cannot exhaust the
/// thread stack.
fn find_cycles<'a>(node_ids: &[&'a str], adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    // (node, index of the next edge to explore)
    let mut frames: Vec<(&str, usize)> = Vec::new();

    for &root in node_ids {
        if visited.contains(root) {
            continue;
        }
        visited.insert(root);
        on_stack.insert(root);
        frames.push((root, 0));

        while let Some(frame) = frames.last_mut() {
            let (node, index) = *frame;
            let edges = adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
            let Some(&next) = edges.get(index) else {
                frames.pop();
                on_stack.remove(node);
                continue;
            };
            frame.1 += 1;

            if on_stack.contains(next) {
                if let Some(start) = frames.iter().position(|&(n, _)| n == next) {
                    let mut cycle: Vec<String> = frames[start..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(next.to_string());
                    cycles.push(cycle);
                }
            } else if visited.insert(next) {
                on_stack.insert(next);
                frames.push((next, 0));
            }
        }
    }
    cycles
}

/// Breadth-first reachability from every node without incoming edges
fn find_unreachable(
    node_ids: &[&str],
    adjacency: &HashMap<&str, Vec<&str>>,
    incoming: &HashMap<&str, usize>,
) -> Vec<String> {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = node_ids
        .iter()
        .copied()
        .filter(|id| incoming.get(id).copied().unwrap_or(0) == 0)
        .collect();
    reached.extend(queue.iter().copied());

    while let Some(node) = queue.pop_front() {
        for &next in adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
            if reached.insert(next) {
                queue.push_back(next);
            }
        }
    }

    node_ids
        .iter()
        .filter(|id| !reached.contains(*id))
        .map(|id| id.to_string())
        .collect()
}

fn performance_issues(
    definition: &WorkflowDefinition,
    node_ids: &[&str],
    outgoing: &HashMap<&str, usize>,
    limits: &ValidationLimits,
) -> Vec<PerformanceIssue> {
    let mut issues = Vec::new();

    let n = node_ids.len();
    if n > 1 {
        let density = definition.connections.len() as f64 / (n * (n - 1)) as f64;
        if density > limits.max_density {
            issues.push(PerformanceIssue {
                issue_type: "connection_density".to_string(),
                node_id: None,
                severity: Severity::Medium,
                current_value: density,
                threshold: limits.max_density,
                unit: "ratio".to_string(),
            });
        }
    }

    for &node_id in node_ids {
        let fan_out = outgoing.get(node_id).copied().unwrap_or(0);
        if fan_out > limits.fan_out_medium {
            let severity = if fan_out > limits.fan_out_high {
                Severity::High
            } else {
                Severity::Medium
            };
            issues.push(PerformanceIssue {
                issue_type: "fan_out".to_string(),
                node_id: Some(node_id.to_string()),
                severity,
                current_value: fan_out as f64,
                threshold: limits.fan_out_medium as f64,
                unit: "connections".to_string(),
            });
        }
    }

    issues
}

fn performance_to_issue(issue: &PerformanceIssue) -> ValidationIssue {
    let (message, suggestion) = match issue.node_id.as_deref() {
        Some(node_id) => (
            format!(
                "Node '{}' fans out to {} connections (threshold {})",
                node_id, issue.current_value, issue.threshold
            ),
            "Split the fan-out across intermediate nodes",
        ),
        None => (
            format!(
                "Connection density {:.0}% exceeds {:.0}%",
                issue.current_value * 100.0,
                issue.threshold * 100.0
            ),
            "Simplify the graph; dense wiring adds dispatch latency",
        ),
    };

    let mut validation_issue =
        ValidationIssue::new(IssueKind::Performance, message).with_suggestion(suggestion);
    if let Some(node_id) = &issue.node_id {
        validation_issue = validation_issue.with_node(node_id);
    }
    validation_issue
}
