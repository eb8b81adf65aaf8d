//! Append-only arena of agent nodes and parent→child edges for one run.
//!
//! Nodes are addressed by [`NodeId`] (1-based, dense). Parents are stored as
//! ids rather than references, so the graph owns every node exactly once.

use anyhow::{Result, anyhow};

use crate::core::kb::KbSnapshot;
use crate::core::limits::{CONTEXT_HIERARCHY_MAX_DEPTH, CONTEXT_HIERARCHY_PROBLEM_CHARS};
use crate::core::text::clip;
use crate::core::types::{AgentOutput, AgentType, ContextItem, NodeId, NodeStatus, SpawnRequest, Task};

/// Input captured for a node. `local_context` grows on every resume.
#[derive(Debug, Clone, Default)]
pub struct NodeInput {
    pub problem: String,
    pub task: Task,
    pub local_context: Vec<ContextItem>,
    /// Snapshot taken at the node's latest activation.
    pub kb_snapshot: KbSnapshot,
    /// Markdown chain of ancestors, rendered once at spawn time.
    pub context_hierarchy: String,
}

#[derive(Debug, Clone)]
pub struct AgentNode {
    pub id: NodeId,
    pub agent_type: AgentType,
    pub parent: Option<NodeId>,
    /// Whether completion is routed back into the parent's context.
    pub linked: bool,
    /// Parent activation that spawned this node (0 for the root).
    pub spawn_batch: u32,
    pub children: Vec<NodeId>,
    pub input: NodeInput,
    pub output: Option<AgentOutput>,
    pub failure: Option<String>,
    pub status: NodeStatus,
    pub pending_children: usize,
    /// Child results held until the last linked child resolves.
    pub buffered: Vec<ContextItem>,
    pub activations: u32,
}

impl AgentNode {
    fn new(
        id: NodeId,
        agent_type: AgentType,
        parent: Option<NodeId>,
        input: NodeInput,
    ) -> Self {
        Self {
            id,
            agent_type,
            parent,
            linked: parent.is_some(),
            spawn_batch: 0,
            children: Vec::new(),
            input,
            output: None,
            failure: None,
            status: NodeStatus::Pending,
            pending_children: 0,
            buffered: Vec::new(),
            activations: 0,
        }
    }
}

/// Directed `parent → child` edge, immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub parent: NodeId,
    pub child: NodeId,
    pub linked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContextGraph {
    nodes: Vec<AgentNode>,
    edges: Vec<Edge>,
}

impl ContextGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[AgentNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    fn next_id(&self) -> NodeId {
        self.nodes.len() as NodeId + 1
    }

    fn slot(id: NodeId) -> Option<usize> {
        (id as usize).checked_sub(1)
    }

    pub fn node(&self, id: NodeId) -> Option<&AgentNode> {
        Self::slot(id).and_then(|slot| self.nodes.get(slot))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut AgentNode> {
        Self::slot(id).and_then(|slot| self.nodes.get_mut(slot))
    }

    /// Like [`node`](Self::node) but treats a missing id as a runtime error.
    pub fn require(&self, id: NodeId) -> Result<&AgentNode> {
        self.node(id).ok_or_else(|| anyhow!("unknown node {id}"))
    }

    pub fn require_mut(&mut self, id: NodeId) -> Result<&mut AgentNode> {
        self.node_mut(id).ok_or_else(|| anyhow!("unknown node {id}"))
    }

    pub fn add_root(&mut self, agent_type: AgentType, problem: &str, task: Task) -> NodeId {
        let id = self.next_id();
        let input = NodeInput {
            problem: problem.to_string(),
            task,
            ..NodeInput::default()
        };
        self.nodes.push(AgentNode::new(id, agent_type, None, input));
        id
    }

    /// Create a child for `request`, recording the edge and the parent's batch.
    pub fn add_child(&mut self, parent: NodeId, request: &SpawnRequest) -> Result<NodeId> {
        let id = self.next_id();
        let hierarchy = self.context_hierarchy(parent);
        let parent_node = self.require_mut(parent)?;
        parent_node.children.push(id);
        let input = NodeInput {
            problem: parent_node.input.problem.clone(),
            task: request.task.clone(),
            context_hierarchy: hierarchy,
            ..NodeInput::default()
        };
        let mut node = AgentNode::new(id, request.agent_type, Some(parent), input);
        node.linked = request.edge_from_parent;
        node.spawn_batch = parent_node.activations;
        self.nodes.push(node);
        self.edges.push(Edge {
            parent,
            child: id,
            linked: request.edge_from_parent,
        });
        Ok(id)
    }

    /// Ancestor chain of `id`, root first, including `id` itself.
    pub fn lineage(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = self.node(id);
        while let Some(node) = cursor {
            chain.push(node.id);
            cursor = node.parent.and_then(|parent| self.node(parent));
        }
        chain.reverse();
        chain
    }

    /// Markdown bullets for the lineage ending at `id`, at most
    /// `CONTEXT_HIERARCHY_MAX_DEPTH` levels (closest ancestors kept).
    pub fn context_hierarchy(&self, id: NodeId) -> String {
        let lineage = self.lineage(id);
        let start = lineage.len().saturating_sub(CONTEXT_HIERARCHY_MAX_DEPTH);
        lineage[start..]
            .iter()
            .enumerate()
            .filter_map(|(depth, &node_id)| {
                let node = self.node(node_id)?;
                let task = &node.input.task;
                let problem = if task.problem.trim().is_empty() {
                    &node.input.problem
                } else {
                    &task.problem
                };
                Some(format!(
                    "{}- **{}#{} ({})**: {}",
                    "  ".repeat(depth),
                    node.agent_type,
                    node.id,
                    task.goal.as_str(),
                    clip(problem, CONTEXT_HIERARCHY_PROBLEM_CHARS)
                ))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
