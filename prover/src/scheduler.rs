//! Single-threaded, stack-driven scheduler over the context graph.
//!
//! Exactly one node is active at a time. A node's turn runs until it either
//! finishes or declares children; children are pushed in reverse request order
//! so the first-requested child runs first and fully resolves (with its whole
//! subtree) before the next sibling starts.

use std::fmt;

use anyhow::{Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::agents::Agent;
use crate::core::graph::ContextGraph;
use crate::core::invariants::validate_graph;
use crate::core::kb::{KbWriteOutcome, KnowledgeBase};
use crate::core::types::{
    AgentInput, AgentOutput, AgentType, ContextItem, ContextResult, Goal, NodeId, NodeStatus,
    SolutionAttempt, Task,
};
use crate::io::trace::{NullTrace, TraceEvent, TraceSink, TracedKbWrite};

/// Why a run terminated without a completed root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    StepBudgetExceeded { max_steps: u32 },
    RootFailed { reason: String },
    /// Stack drained while the root was still waiting.
    Stalled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepBudgetExceeded { max_steps } => {
                write!(f, "step budget of {max_steps} activations exceeded")
            }
            FailureReason::RootFailed { reason } => write!(f, "root agent failed: {reason}"),
            FailureReason::Stalled => f.write_str("scheduler stalled before the root completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded(AgentOutput),
    Failed(FailureReason),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded(_))
    }
}

/// What a single `step` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing runnable.
    Idle,
    Suspended { node: NodeId, children: Vec<NodeId> },
    Completed { node: NodeId },
    Failed { node: NodeId, reason: String },
}

/// One orchestration over a single problem. Owned by the scheduler loop.
pub struct Run {
    problem: String,
    graph: ContextGraph,
    kb: KnowledgeBase,
    stack: Vec<NodeId>,
    steps: u32,
    root: NodeId,
    activation_order: Vec<NodeId>,
    outcome: Option<RunOutcome>,
    trace: Box<dyn TraceSink>,
}

/// Start a run whose trace is discarded.
pub fn create_run(problem: &str) -> Run {
    Run::new(problem, "default", Box::new(NullTrace))
}

impl Run {
    /// Initialize an empty graph and KB with one pending orchestrator root.
    pub fn new(problem: &str, config_name: &str, mut trace: Box<dyn TraceSink>) -> Self {
        trace.record(&TraceEvent::RunStart {
            config: config_name.to_string(),
        });
        let mut graph = ContextGraph::new();
        let root = graph.add_root(
            AgentType::Orchestrator,
            problem,
            Task::new(problem, Goal::Orchestrate),
        );
        Self {
            problem: problem.to_string(),
            graph,
            kb: KnowledgeBase::new(),
            stack: vec![root],
            steps: 0,
            root,
            activation_order: Vec::new(),
            outcome: None,
            trace,
        }
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn graph(&self) -> &ContextGraph {
        &self.graph
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Node ids in the order they were activated.
    pub fn activation_order(&self) -> &[NodeId] {
        &self.activation_order
    }

    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Activate the top of the stack and apply what its agent returned.
    #[instrument(skip_all, fields(step = self.steps + 1))]
    pub fn step(&mut self, agent: &dyn Agent) -> Result<StepOutcome> {
        let Some(node_id) = self.stack.pop() else {
            return Ok(StepOutcome::Idle);
        };
        let snapshot = self.kb.read_snapshot();
        let node = self.graph.require_mut(node_id)?;
        if node.status != NodeStatus::Pending {
            bail!("node {node_id} scheduled while {}", node.status);
        }
        node.status = NodeStatus::Active;
        node.activations += 1;
        node.input.kb_snapshot = snapshot;
        let agent_type = node.agent_type;
        self.steps += 1;
        self.activation_order.push(node_id);
        self.trace.record(&TraceEvent::AgentStart {
            id: node_id,
            agent_type,
            step: self.steps,
        });
        debug!(node = node_id, %agent_type, "activating node");

        let node = self.graph.require(node_id)?;
        let input = AgentInput {
            node_id,
            agent_type,
            problem: &node.input.problem,
            task: &node.input.task,
            local_context: &node.input.local_context,
            kb: &node.input.kb_snapshot,
            context_hierarchy: &node.input.context_hierarchy,
        };
        match agent.run(&input) {
            Ok(output) => self.apply_output(node_id, output),
            Err(err) => self.fail_node(node_id, format!("{err:#}")),
        }
    }

    fn apply_output(&mut self, node_id: NodeId, output: AgentOutput) -> Result<StepOutcome> {
        self.apply_kb_writes(node_id, &output);

        if !output.spawn_requests.is_empty() {
            let mut children = Vec::with_capacity(output.spawn_requests.len());
            for request in &output.spawn_requests {
                let child = self.graph.add_child(node_id, request)?;
                self.trace.record(&TraceEvent::AgentSpawn {
                    id: child,
                    parent: node_id,
                    agent_type: request.agent_type,
                    linked: request.edge_from_parent,
                });
                children.push(child);
            }
            self.stack.extend(children.iter().rev());

            let linked = output
                .spawn_requests
                .iter()
                .filter(|request| request.edge_from_parent)
                .count();
            if linked > 0 {
                let node = self.graph.require_mut(node_id)?;
                node.status = NodeStatus::Suspended;
                node.pending_children = linked;
                let agent_type = node.agent_type;
                self.trace.record(&TraceEvent::AgentEnd {
                    id: node_id,
                    agent_type,
                    status: NodeStatus::Suspended,
                    spawned: children.len(),
                });
                debug!(node = node_id, spawned = children.len(), linked, "node suspended");
                return Ok(StepOutcome::Suspended {
                    node: node_id,
                    children,
                });
            }
        }

        let node = self.graph.require_mut(node_id)?;
        node.status = NodeStatus::Completed;
        node.output = Some(output.clone());
        let agent_type = node.agent_type;
        let task = node.input.task.clone();
        self.trace.record(&TraceEvent::AgentEnd {
            id: node_id,
            agent_type,
            status: NodeStatus::Completed,
            spawned: output.spawn_requests.len(),
        });
        self.deliver(node_id, task, ContextResult::Output(output))?;
        Ok(StepOutcome::Completed { node: node_id })
    }

    fn apply_kb_writes(&mut self, node_id: NodeId, output: &AgentOutput) {
        if output.kb_writes.is_empty() {
            return;
        }
        let records = self.kb.write(output.kb_writes.iter().cloned());
        for record in &records {
            match record.outcome {
                KbWriteOutcome::Overwrote => {
                    info!(node = node_id, id = %record.id, "kb entry overwritten");
                }
                KbWriteOutcome::Rejected => {
                    warn!(node = node_id, "kb entry with empty id ignored");
                }
                KbWriteOutcome::Inserted => {}
            }
        }
        self.trace.record(&TraceEvent::KbWrite {
            node: node_id,
            entries: records
                .into_iter()
                .map(|record| TracedKbWrite {
                    id: record.id,
                    kind: record.kind,
                    outcome: record.outcome,
                })
                .collect(),
        });
    }

    fn fail_node(&mut self, node_id: NodeId, reason: String) -> Result<StepOutcome> {
        let node = self.graph.require_mut(node_id)?;
        node.status = NodeStatus::Failed;
        node.failure = Some(reason.clone());
        let agent_type = node.agent_type;
        let task = node.input.task.clone();
        warn!(node = node_id, %agent_type, reason = %reason, "agent failed");
        self.trace.record(&TraceEvent::AgentEnd {
            id: node_id,
            agent_type,
            status: NodeStatus::Failed,
            spawned: 0,
        });
        self.deliver(
            node_id,
            task,
            ContextResult::Failed {
                reason: reason.clone(),
            },
        )?;
        Ok(StepOutcome::Failed {
            node: node_id,
            reason,
        })
    }

    /// Route a terminal child result to its parent; resume the parent on the last one.
    fn deliver(&mut self, child_id: NodeId, task: Task, result: ContextResult) -> Result<()> {
        let child = self.graph.require(child_id)?;
        let (Some(parent_id), true) = (child.parent, child.linked) else {
            return Ok(());
        };
        let item = ContextItem {
            from: child_id,
            agent_type: child.agent_type,
            task,
            batch: child.spawn_batch,
            result,
        };

        let parent = self.graph.require_mut(parent_id)?;
        if parent.status != NodeStatus::Suspended || parent.pending_children == 0 {
            bail!(
                "node {child_id} finished but parent {parent_id} is {} with {} pending",
                parent.status,
                parent.pending_children
            );
        }
        parent.buffered.push(item);
        parent.pending_children -= 1;
        if parent.pending_children == 0 {
            let resolved = std::mem::take(&mut parent.buffered);
            parent.input.local_context.extend(resolved);
            parent.status = NodeStatus::Pending;
            self.stack.push(parent_id);
            debug!(node = parent_id, "children resolved, parent resumable");
        }
        Ok(())
    }

    /// Step until the stack drains or `max_steps` activations have run.
    ///
    /// Agent failures end as `Ok(RunOutcome::Failed)`; `Err` means the
    /// scheduler itself broke an invariant.
    #[instrument(skip_all, fields(max_steps = max_steps))]
    pub fn run_to_completion(&mut self, agent: &dyn Agent, max_steps: u32) -> Result<RunOutcome> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        while !self.stack.is_empty() {
            if self.steps >= max_steps {
                warn!(max_steps, pending = self.stack.len(), "step budget exhausted");
                return Ok(self.finish(RunOutcome::Failed(FailureReason::StepBudgetExceeded {
                    max_steps,
                })));
            }
            self.step(agent)?;
            if cfg!(debug_assertions) {
                let errors = validate_graph(&self.graph);
                if !errors.is_empty() {
                    bail!("context graph invariants failed: {}", errors.join("; "));
                }
            }
        }

        let root = self.graph.require(self.root)?;
        let outcome = match (root.status, &root.output) {
            (NodeStatus::Completed, Some(output)) => RunOutcome::Succeeded(output.clone()),
            (NodeStatus::Failed, _) => RunOutcome::Failed(FailureReason::RootFailed {
                reason: root.failure.clone().unwrap_or_default(),
            }),
            _ => RunOutcome::Failed(FailureReason::Stalled),
        };
        Ok(self.finish(outcome))
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunOutcome {
        let reason = match &outcome {
            RunOutcome::Succeeded(_) => None,
            RunOutcome::Failed(reason) => Some(reason.to_string()),
        };
        info!(steps = self.steps, nodes = self.graph.len(), success = reason.is_none(), "run finished");
        self.trace.record(&TraceEvent::RunEnd {
            success: reason.is_none(),
            reason,
        });
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Accepted-or-best solution available so far.
    ///
    /// Prefers the root's output; otherwise the most recent solve-level
    /// worker result, so failed runs still report what they produced.
    pub fn best_attempt(&self) -> Option<SolutionAttempt> {
        if let Some(attempt) = self
            .graph
            .node(self.root)
            .and_then(|root| root.output.as_ref())
            .and_then(AgentOutput::solution)
        {
            return Some(attempt.clone());
        }
        let candidates = || {
            self.graph.nodes().iter().rev().filter(|node| {
                node.status == NodeStatus::Completed && node.agent_type == AgentType::Worker
            })
        };
        candidates()
            .filter(|node| node.input.task.goal == Goal::Solve)
            .chain(candidates())
            .find_map(|node| node.output.as_ref().and_then(AgentOutput::solution))
            .cloned()
    }
}
