//! Structural invariants of a context graph.

use std::collections::HashSet;

use crate::core::graph::ContextGraph;
use crate::core::types::NodeStatus;

/// Check structural invariants of the graph:
/// - ids are dense, unique and 1-based
/// - every non-root node has an existing parent created before it (hence acyclic)
/// - edges mirror parent links and child lists
/// - at most one node is `Active`
/// - `Completed` nodes carry output; `Failed` nodes carry a reason
/// - `Suspended` nodes wait on at least one child; other nodes wait on none
pub fn validate_graph(graph: &ContextGraph) -> Vec<String> {
    let mut errors = Vec::new();
    let mut active = Vec::new();

    for (slot, node) in graph.nodes().iter().enumerate() {
        let expected = slot as u32 + 1;
        if node.id != expected {
            errors.push(format!("node at slot {slot} has id {} (expected {expected})", node.id));
        }

        match node.parent {
            None if slot != 0 => errors.push(format!("node {} has no parent", node.id)),
            Some(_) if slot == 0 => errors.push(format!("root node {} has a parent", node.id)),
            Some(parent) if parent >= node.id => {
                errors.push(format!("node {} has parent {parent} created after it", node.id));
            }
            Some(parent) => match graph.node(parent) {
                Some(parent_node) if !parent_node.children.contains(&node.id) => {
                    errors.push(format!("parent {parent} does not list child {}", node.id));
                }
                Some(_) => {}
                None => errors.push(format!("node {} has unknown parent {parent}", node.id)),
            },
            None => {}
        }

        match node.status {
            NodeStatus::Active => active.push(node.id),
            NodeStatus::Completed if node.output.is_none() => {
                errors.push(format!("completed node {} has no output", node.id));
            }
            NodeStatus::Failed if node.failure.is_none() => {
                errors.push(format!("failed node {} has no failure reason", node.id));
            }
            _ => {}
        }

        let waiting = node.status == NodeStatus::Suspended;
        if waiting && node.pending_children == 0 {
            errors.push(format!("suspended node {} waits on no children", node.id));
        }
        if !waiting && node.pending_children > 0 {
            errors.push(format!(
                "{} node {} still waits on {} children",
                node.status, node.id, node.pending_children
            ));
        }
    }

    if active.len() > 1 {
        errors.push(format!("multiple active nodes: {active:?}"));
    }

    let mut seen_children = HashSet::new();
    for edge in graph.edges() {
        if !seen_children.insert(edge.child) {
            errors.push(format!("node {} has more than one incoming edge", edge.child));
        }
        match graph.node(edge.child) {
            Some(child) if child.parent != Some(edge.parent) => errors.push(format!(
                "edge {} -> {} disagrees with parent link {:?}",
                edge.parent, edge.child, child.parent
            )),
            Some(child) if child.linked != edge.linked => errors.push(format!(
                "edge {} -> {} disagrees with link flag",
                edge.parent, edge.child
            )),
            Some(_) => {}
            None => errors.push(format!("edge {} -> {} targets unknown node", edge.parent, edge.child)),
        }
    }
    if seen_children.len() + 1 != graph.len() && !graph.is_empty() {
        errors.push(format!(
            "{} edges recorded for {} non-root nodes",
            seen_children.len(),
            graph.len() - 1
        ));
    }

    errors
}
