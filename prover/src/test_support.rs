//! Test-only helpers: stub agents, a scripted completion service, agent input
//! fixtures and on-disk problem fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::kb::{KbSnapshot, KnowledgeBase};
use crate::core::types::{
    AgentInput, AgentOutput, AgentType, ContextItem, ContextResult, KbEntry, NodeId, Normalized,
    SolutionAttempt, Task,
};
use crate::io::completion::{Completion, CompletionRequest, CompletionService, ToolCall};

/// System-prompt fragments that identify each LLM-backed agent.
pub const EXPLORATION: &str = "Propose at most";
pub const PROVER: &str = "write a plan whose steps";
pub const VERIFIER: &str = "mathematical referee";
pub const PARSER: &str = "semi-structured Markdown";
pub const KB_SUMMARIZER: &str = "restate it as a concise fact";

/// Pin a closure to the agent signature so its lifetimes infer correctly.
pub fn stub_agent<F>(f: F) -> F
where
    F: Fn(&AgentInput<'_>) -> Result<AgentOutput>,
{
    f
}

type Reply = std::result::Result<Completion, String>;

struct Route {
    system: String,
    user: Option<String>,
    replies: VecDeque<Reply>,
    last: Option<Reply>,
}

/// Completion service that replays scripted replies.
///
/// A request is routed to the first route whose system fragment (and user
/// fragment, when given) it contains. Each route pops its replies in order and
/// repeats the last one once exhausted. Every request is recorded.
#[derive(Default)]
pub struct ScriptedCompletion {
    routes: RefCell<Vec<Route>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, system: &str, user: Option<&str>, reply: Reply) -> Self {
        {
            let mut routes = self.routes.borrow_mut();
            let existing = routes
                .iter_mut()
                .find(|route| route.system == system && route.user.as_deref() == user);
            match existing {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    system: system.to_string(),
                    user: user.map(str::to_string),
                    replies: VecDeque::from([reply]),
                    last: None,
                }),
            }
        }
        self
    }

    pub fn on(self, system: &str, completion: Completion) -> Self {
        self.push(system, None, Ok(completion))
    }

    pub fn on_text(self, system: &str, text: &str) -> Self {
        self.on(system, Completion::text(text))
    }

    /// Reply only when the user prompt also contains `user`.
    pub fn on_user_text(self, system: &str, user: &str, text: &str) -> Self {
        self.push(system, Some(user), Ok(Completion::text(text)))
    }

    pub fn fail(self, system: &str, message: &str) -> Self {
        self.push(system, None, Err(message.to_string()))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    /// Recorded requests whose system prompt contains `system`.
    pub fn requests_for(&self, system: &str) -> Vec<CompletionRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.system_prompt().contains(system))
            .cloned()
            .collect()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.borrow_mut().push(request.clone());
        let mut routes = self.routes.borrow_mut();
        let route = routes
            .iter_mut()
            .find(|route| {
                request.system_prompt().contains(&route.system)
                    && route
                        .user
                        .as_deref()
                        .is_none_or(|user| request.user_prompt().contains(user))
            })
            .ok_or_else(|| anyhow!("no scripted completion for model {}", request.model))?;
        let reply = match route.replies.pop_front() {
            Some(reply) => {
                route.last = Some(reply.clone());
                reply
            }
            None => route
                .last
                .clone()
                .ok_or_else(|| anyhow!("scripted route exhausted"))?,
        };
        reply.map_err(|message| anyhow!(message))
    }
}

/// Completion that only calls the `finish` tool.
pub fn finish_call(output_text: &str) -> Completion {
    Completion {
        text: String::new(),
        tool_calls: vec![ToolCall::new(
            "finish",
            serde_json::json!({ "output_text": output_text }),
        )],
    }
}

/// Owned data behind an [`AgentInput`].
#[derive(Debug, Clone)]
pub struct InputFixture {
    pub node_id: NodeId,
    pub agent_type: AgentType,
    pub problem: String,
    pub task: Task,
    pub local_context: Vec<ContextItem>,
    pub kb: KbSnapshot,
    pub hierarchy: String,
}

impl InputFixture {
    pub fn new(agent_type: AgentType, task: Task) -> Self {
        Self {
            node_id: 2,
            agent_type,
            problem: task.problem.clone(),
            task,
            local_context: Vec::new(),
            kb: KbSnapshot::default(),
            hierarchy: String::new(),
        }
    }

    pub fn with_context(mut self, items: Vec<ContextItem>) -> Self {
        self.local_context = items;
        self
    }

    pub fn with_kb(mut self, entries: Vec<KbEntry>) -> Self {
        let mut kb = KnowledgeBase::new();
        kb.write(entries);
        self.kb = kb.read_snapshot();
        self
    }

    pub fn input(&self) -> AgentInput<'_> {
        AgentInput {
            node_id: self.node_id,
            agent_type: self.agent_type,
            problem: &self.problem,
            task: &self.task,
            local_context: &self.local_context,
            kb: &self.kb,
            context_hierarchy: &self.hierarchy,
        }
    }
}

/// Routed result of a completed child.
pub fn output_item(from: NodeId, batch: u32, task: Task, output: AgentOutput) -> ContextItem {
    ContextItem {
        from,
        agent_type: output.agent_type,
        task,
        batch,
        result: ContextResult::Output(output),
    }
}

/// Routed result of a prover child that produced `attempt`.
pub fn attempt_item(from: NodeId, batch: u32, attempt: SolutionAttempt) -> ContextItem {
    let raw = attempt.final_answer.clone();
    output_item(
        from,
        batch,
        Task::default(),
        AgentOutput::finished(AgentType::Prover, raw, Some(Normalized::Solution(attempt))),
    )
}

/// Routed failure of a child.
pub fn failed_item(
    from: NodeId,
    batch: u32,
    agent_type: AgentType,
    task: Task,
    reason: &str,
) -> ContextItem {
    ContextItem {
        from,
        agent_type,
        task,
        batch,
        result: ContextResult::Failed {
            reason: reason.to_string(),
        },
    }
}

/// Problem file plus output locations in a temporary directory.
pub struct ProblemFixture {
    temp: TempDir,
    input: PathBuf,
}

impl ProblemFixture {
    pub fn new(problem: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let input = temp.path().join("problem.md");
        fs::write(&input, problem).with_context(|| format!("write {}", input.display()))?;
        Ok(Self { temp, input })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> PathBuf {
        self.temp.path().join("report.md")
    }

    pub fn trace(&self) -> PathBuf {
        self.temp.path().join("trace.jsonl")
    }

    /// Write a TOML config next to the problem and return its path.
    pub fn write_config(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.temp.path().join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_output(&self) -> Result<String> {
        let path = self.output();
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}
