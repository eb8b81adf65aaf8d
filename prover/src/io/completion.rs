//! Completion service abstraction.
//!
//! The [`CompletionService`] trait decouples agents from the model backend.
//! [`CommandCompletion`] pipes a JSON request into an external command; tests
//! use scripted services that return predetermined completions.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::config::{CompletionConfig, LlmConfig};
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Function-tool definitions the model may call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    pub fn new(llm: &LlmConfig, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: llm.model.clone(),
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.into(),
                },
                Message {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            temperature: llm.temperature,
            top_p: llm.top_p,
            max_tokens: llm.max_tokens,
            tools: Vec::new(),
            response_format: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn json_response(mut self) -> Self {
        self.response_format = Some(ResponseFormat::JsonObject);
        self
    }

    fn content_of(&self, role: Role) -> &str {
        self.messages
            .iter()
            .find(|message| message.role == role)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    pub fn system_prompt(&self) -> &str {
        self.content_of(Role::System)
    }

    pub fn user_prompt(&self) -> &str {
        self.content_of(Role::User)
    }
}

/// Structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Either a JSON object or a string holding JSON.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }

    /// Arguments as a JSON value, decoding string-encoded payloads.
    pub fn arguments_value(&self) -> Result<Value> {
        match &self.arguments {
            Value::String(raw) if raw.trim().is_empty() => Ok(Value::Object(Default::default())),
            Value::String(raw) => serde_json::from_str(raw)
                .with_context(|| format!("parse arguments of tool call {}", self.name)),
            Value::Null => Ok(Value::Object(Default::default())),
            other => Ok(other.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Abstraction over completion backends.
pub trait CompletionService {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Completion service backed by an external command.
///
/// The request is written to stdin as JSON. Stdout is either a completion
/// object (`{"text": ..., "tool_calls": [...]}`) or plain text.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    pub fn new(config: &CompletionConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl CompletionService for CommandCompletion {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("completion command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let payload = serde_json::to_vec(request).context("serialize completion request")?;
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run completion command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "completion command timed out");
            return Err(anyhow!("completion command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "completion command failed");
            return Err(anyhow!(
                "completion command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(500)
            ));
        }

        let completion = parse_completion_stdout(&output.stdout_text());
        debug!(
            chars = completion.text.len(),
            tool_calls = completion.tool_calls.len(),
            "completion received"
        );
        Ok(completion)
    }
}

/// Stdout as a completion object when it is one, otherwise as plain text.
pub fn parse_completion_stdout(stdout: &str) -> Completion {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{')
        && let Ok(completion) = serde_json::from_str::<Completion>(trimmed)
    {
        return completion;
    }
    Completion::text(trimmed)
}
