//! Tool-call surface offered to LLM-backed agents.
//!
//! Three function tools are exposed: `spawn_agent`, `kb_write` and `finish`.
//! Malformed calls are skipped with a warning; they never fail the node.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::core::types::{AgentType, Goal, KbEntry, KbKind, SpawnRequest, Task};
use crate::io::completion::ToolCall;

pub const SPAWN_AGENT: &str = "spawn_agent";
pub const KB_WRITE: &str = "kb_write";
pub const FINISH: &str = "finish";

/// OpenAI-style function definitions for the completion request.
pub fn tool_definitions() -> Vec<Value> {
    let agent_types: Vec<&str> = AgentType::ALL.iter().map(|t| t.as_str()).collect();
    let kinds: Vec<&str> = KbKind::ALL.iter().map(|k| k.as_str()).collect();
    vec![
        json!({
            "type": "function",
            "function": {
                "name": SPAWN_AGENT,
                "description": "Spawn a sub-agent to handle a task.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "agent_type": {"type": "string", "enum": agent_types},
                        "task": {"type": "object"},
                        "edge_from_parent": {"type": "boolean", "default": true}
                    },
                    "required": ["agent_type", "task"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": KB_WRITE,
                "description": "Write entries to the knowledge base.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "entries": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "id": {"type": "string"},
                                    "kind": {"type": "string", "enum": kinds},
                                    "title": {"type": "string"},
                                    "content": {"type": "string"},
                                    "tags": {"type": "array", "items": {"type": "string"}},
                                    "sources": {"type": "array", "items": {"type": "string"}}
                                },
                                "required": ["id", "kind", "title", "content"]
                            }
                        }
                    },
                    "required": ["entries"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": FINISH,
                "description": "Signal that the answer is complete.",
                "parameters": {
                    "type": "object",
                    "properties": {"output_text": {"type": "string"}},
                    "required": ["output_text"]
                }
            }
        }),
    ]
}

/// KB entry as written by a model: lenient kind, optional fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KbEntryArgs {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub sources: Vec<String>,
}

impl KbEntryArgs {
    pub fn into_entry(self) -> KbEntry {
        let title = if self.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            self.title
        };
        KbEntry {
            id: self.id,
            kind: KbKind::parse_lenient(&self.kind),
            title,
            content: self.content,
            tags: self.tags.into_iter().collect::<BTreeSet<_>>(),
            sources: self.sources,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnArgs {
    agent_type: String,
    #[serde(default)]
    task: Value,
    #[serde(default)]
    edge_from_parent: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct KbWriteArgs {
    #[serde(default)]
    entries: Vec<KbEntryArgs>,
}

#[derive(Debug, Deserialize)]
struct FinishArgs {
    #[serde(default)]
    output_text: Option<String>,
}

/// Typed actions extracted from a completion's tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolActions {
    pub spawns: Vec<SpawnRequest>,
    pub kb_writes: Vec<KbEntry>,
    /// Last `finish` call wins.
    pub finish_text: Option<String>,
}

pub fn parse_tool_calls(calls: &[ToolCall]) -> ToolActions {
    let mut actions = ToolActions::default();
    for call in calls {
        if let Err(err) = apply_call(call, &mut actions) {
            warn!(tool = %call.name, err = %format!("{err:#}"), "ignoring malformed tool call");
        }
    }
    actions
}

fn apply_call(call: &ToolCall, actions: &mut ToolActions) -> Result<()> {
    let args = call.arguments_value()?;
    match call.name.as_str() {
        SPAWN_AGENT => {
            let args: SpawnArgs = serde_json::from_value(args).context("spawn_agent arguments")?;
            let agent_type = AgentType::parse(&args.agent_type)
                .with_context(|| format!("unknown agent type {}", args.agent_type))?;
            let task = match args.task {
                Value::String(problem) => Task::new(problem, Goal::Solve),
                Value::Null => Task::default(),
                value => serde_json::from_value(value).context("spawn_agent task")?,
            };
            actions.spawns.push(SpawnRequest {
                agent_type,
                task,
                edge_from_parent: args.edge_from_parent.unwrap_or(true),
            });
        }
        KB_WRITE => {
            let args: KbWriteArgs = serde_json::from_value(args).context("kb_write arguments")?;
            actions
                .kb_writes
                .extend(args.entries.into_iter().map(KbEntryArgs::into_entry));
        }
        FINISH => {
            let args: FinishArgs = serde_json::from_value(args).context("finish arguments")?;
            if let Some(text) = args.output_text.filter(|text| !text.trim().is_empty()) {
                actions.finish_text = Some(text);
            }
        }
        other => {
            warn!(tool = other, "ignoring unknown tool");
        }
    }
    Ok(())
}
