//! Shared deterministic types for the orchestration core.
//!
//! These types define the contracts between the scheduler, the knowledge base
//! and the agents. They carry no I/O handles and serialize deterministically so
//! that traces and tests can compare them structurally.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::kb::KbSnapshot;

/// Run-scoped node identifier. Assigned from 1 upward, never reused.
pub type NodeId = u32;

/// Fixed set of agent variants the scheduler can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Exploration,
    Worker,
    Prover,
    Verifier,
    Parser,
    SubWorker,
}

impl AgentType {
    pub const ALL: [AgentType; 7] = [
        AgentType::Orchestrator,
        AgentType::Exploration,
        AgentType::Worker,
        AgentType::Prover,
        AgentType::Verifier,
        AgentType::Parser,
        AgentType::SubWorker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::Exploration => "exploration",
            AgentType::Worker => "worker",
            AgentType::Prover => "prover",
            AgentType::Verifier => "verifier",
            AgentType::Parser => "parser",
            AgentType::SubWorker => "sub_worker",
        }
    }

    /// Parse a wire name, accepting `-` as well as `_` separators.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|agent_type| agent_type.as_str() == normalized)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node lifecycle state.
///
/// `Pending -> Active -> (Suspended -> Pending -> Active)* -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Active,
    Suspended,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Active => "active",
            NodeStatus::Suspended => "suspended",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a knowledge-base fact.
///
/// Deserialization is lenient (see [`KbKind::parse_lenient`]) because kinds
/// usually arrive from model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum KbKind {
    Definition,
    Notation,
    #[default]
    Result,
    Algorithm,
    Example,
    Counterexample,
}

impl KbKind {
    pub const ALL: [KbKind; 6] = [
        KbKind::Definition,
        KbKind::Notation,
        KbKind::Result,
        KbKind::Algorithm,
        KbKind::Example,
        KbKind::Counterexample,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KbKind::Definition => "Definition",
            KbKind::Notation => "Notation",
            KbKind::Result => "Result",
            KbKind::Algorithm => "Algorithm",
            KbKind::Example => "Example",
            KbKind::Counterexample => "Counterexample",
        }
    }

    /// Case-insensitive lookup; unknown kinds become `Result`.
    pub fn parse_lenient(value: &str) -> Self {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .unwrap_or_default()
    }
}

impl From<String> for KbKind {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl fmt::Display for KbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured fact in the run-scoped knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: String,
    pub kind: KbKind,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl KbEntry {
    pub fn new(
        id: impl Into<String>,
        kind: KbKind,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }
}

/// What a spawned node is asked to accomplish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    Orchestrate,
    Explore,
    #[default]
    Solve,
    DecomposeStep,
    Verify,
    Parse,
}

impl Goal {
    pub fn as_str(self) -> &'static str {
        match self {
            Goal::Orchestrate => "orchestrate",
            Goal::Explore => "explore",
            Goal::Solve => "solve",
            Goal::DecomposeStep => "decompose_step",
            Goal::Verify => "verify",
            Goal::Parse => "parse",
        }
    }
}

/// Structured-parse targets, each backed by a JSON Schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTarget {
    SolutionAttempt,
    ExplorationQuestions,
    KbSummary,
}

impl ParseTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseTarget::SolutionAttempt => "solution_attempt",
            ParseTarget::ExplorationQuestions => "exploration_questions",
            ParseTarget::KbSummary => "kb_summary",
        }
    }
}

/// Typed task payload handed to a node at spawn time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub problem: String,
    pub goal: Goal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Plan step text when the node resolves one step of a decomposition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_problem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration_round: Option<u32>,
    /// Attempts a verifier node is asked to judge.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<SolutionAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_target: Option<ParseTarget>,
}

impl Task {
    pub fn new(problem: impl Into<String>, goal: Goal) -> Self {
        Self {
            problem: problem.into(),
            goal,
            ..Self::default()
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback.filter(|text| !text.trim().is_empty());
        self
    }
}

/// Request, emitted by a running node, to create a child node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub agent_type: AgentType,
    pub task: Task,
    /// Whether the child's completion is routed back into the parent's context.
    #[serde(default = "default_edge_from_parent")]
    pub edge_from_parent: bool,
}

fn default_edge_from_parent() -> bool {
    true
}

impl SpawnRequest {
    pub fn new(agent_type: AgentType, task: Task) -> Self {
        Self {
            agent_type,
            task,
            edge_from_parent: true,
        }
    }

    /// Fire-and-forget child: runs in order but never resumes the parent.
    pub fn detached(mut self) -> Self {
        self.edge_from_parent = false;
        self
    }
}

/// Candidate solution produced by a prover (or synthesized from sub-workers).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolutionAttempt {
    pub final_answer: String,
    pub outline_steps: Vec<String>,
    pub kb_updates: Vec<KbEntry>,
    pub claims_incorrect_conclusion: bool,
    pub accepted: bool,
}

impl SolutionAttempt {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            final_answer: text.into(),
            ..Self::default()
        }
    }
}

/// Verifier ensemble judgement over a batch of attempts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationReport {
    pub accepted: bool,
    pub best_attempt_index: Option<usize>,
    pub attempt_scores: Vec<u32>,
    pub attempt_critiques: Vec<String>,
    pub global_feedback: String,
    /// The judged attempts, in the order they were scored.
    pub attempts: Vec<SolutionAttempt>,
}

impl VerificationReport {
    pub fn best_attempt(&self) -> Option<&SolutionAttempt> {
        self.best_attempt_index.and_then(|index| self.attempts.get(index))
    }

    pub fn best_score(&self) -> Option<u32> {
        self.best_attempt_index
            .and_then(|index| self.attempt_scores.get(index).copied())
    }
}

/// Questions proposed by an exploration node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationQuestions {
    pub questions: Vec<String>,
    pub rationales: Vec<String>,
}

/// Which half of the generation/verification loop a worker just entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    ProverGeneration,
    Verification,
    Decomposition,
}

/// Worker strategy: direct attempts, or a decomposition plan being resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkerMode {
    #[default]
    Direct,
    Decomposing { steps: Vec<String> },
}

/// Intermediate worker status, emitted on activations that spawn children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub phase: WorkerPhase,
    pub mode: WorkerMode,
    pub round_index: u32,
    pub provers_spawned: usize,
    pub verifier_spawned: bool,
    pub decomposition_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    Exploration,
    Solve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub phase: OrchestratorPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_index: Option<u32>,
    pub message: String,
}

/// Agent-specific normalized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Normalized {
    Solution(SolutionAttempt),
    Verification(VerificationReport),
    Questions(ExplorationQuestions),
    WorkerStatus(WorkerStatus),
    OrchestratorStatus(OrchestratorStatus),
    Parsed(serde_json::Value),
    Text(String),
}

/// Everything an agent returns from one activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_type: AgentType,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<Normalized>,
    #[serde(default)]
    pub kb_writes: Vec<KbEntry>,
    #[serde(default)]
    pub spawn_requests: Vec<SpawnRequest>,
}

impl AgentOutput {
    /// Terminal output: no children requested.
    pub fn finished(
        agent_type: AgentType,
        raw_text: impl Into<String>,
        normalized: Option<Normalized>,
    ) -> Self {
        Self {
            agent_type,
            raw_text: raw_text.into(),
            normalized,
            kb_writes: Vec::new(),
            spawn_requests: Vec::new(),
        }
    }

    /// Output that suspends the node until the requested children resolve.
    pub fn spawning(
        agent_type: AgentType,
        raw_text: impl Into<String>,
        normalized: Option<Normalized>,
        spawn_requests: Vec<SpawnRequest>,
    ) -> Self {
        Self {
            spawn_requests,
            ..Self::finished(agent_type, raw_text, normalized)
        }
    }

    pub fn with_kb_writes(mut self, entries: Vec<KbEntry>) -> Self {
        self.kb_writes = entries;
        self
    }

    pub fn solution(&self) -> Option<&SolutionAttempt> {
        match &self.normalized {
            Some(Normalized::Solution(attempt)) => Some(attempt),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&VerificationReport> {
        match &self.normalized {
            Some(Normalized::Verification(report)) => Some(report),
            _ => None,
        }
    }
}

/// Outcome of a linked child, as seen by its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextResult {
    Output(AgentOutput),
    Failed { reason: String },
}

/// One routed element of a parent's `local_context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub from: NodeId,
    pub agent_type: AgentType,
    /// Task the child was spawned with.
    pub task: Task,
    /// Parent activation that requested the child; groups one spawn batch.
    pub batch: u32,
    pub result: ContextResult,
}

impl ContextItem {
    pub fn output(&self) -> Option<&AgentOutput> {
        match &self.result {
            ContextResult::Output(output) => Some(output),
            ContextResult::Failed { .. } => None,
        }
    }

    pub fn solution(&self) -> Option<&SolutionAttempt> {
        self.output().and_then(AgentOutput::solution)
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.result {
            ContextResult::Failed { reason } => Some(reason),
            ContextResult::Output(_) => None,
        }
    }
}

/// Borrowed view of a node handed to its agent for one activation.
#[derive(Debug, Clone, Copy)]
pub struct AgentInput<'a> {
    pub node_id: NodeId,
    pub agent_type: AgentType,
    pub problem: &'a str,
    pub task: &'a Task,
    pub local_context: &'a [ContextItem],
    pub kb: &'a KbSnapshot,
    pub context_hierarchy: &'a str,
}
