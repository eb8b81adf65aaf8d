//! Structured-output parsing with a deterministic fallback.
//!
//! Text is first decoded directly (raw or fenced JSON). If that fails and a
//! parser LLM is configured, the model is asked to restate the text as JSON.
//! Every candidate is validated against the target's JSON Schema before it is
//! deserialized. When nothing validates, the caller's fallback builds the
//! record; parsing itself never fails.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agents::AgentContext;
use crate::core::types::{AgentInput, AgentOutput, AgentType, Normalized, ParseTarget};
use crate::io::completion::CompletionRequest;
use crate::io::config::LlmConfig;
use crate::io::prompt::ParserPrompt;

const SOLUTION_ATTEMPT_SCHEMA: &str = include_str!("../../schemas/solution_attempt.schema.json");
const EXPLORATION_QUESTIONS_SCHEMA: &str =
    include_str!("../../schemas/exploration_questions.schema.json");
const KB_SUMMARY_SCHEMA: &str = include_str!("../../schemas/kb_summary.schema.json");

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Outcome of a parse: the record, tagged with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Structured(T),
    Fallback(T),
}

impl<T> Parsed<T> {
    pub fn into_inner(self) -> T {
        match self {
            Parsed::Structured(value) | Parsed::Fallback(value) => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Parsed::Fallback(_))
    }
}

pub fn schema_for(target: ParseTarget) -> &'static str {
    match target {
        ParseTarget::SolutionAttempt => SOLUTION_ATTEMPT_SCHEMA,
        ParseTarget::ExplorationQuestions => EXPLORATION_QUESTIONS_SCHEMA,
        ParseTarget::KbSummary => KB_SUMMARY_SCHEMA,
    }
}

/// Parse `text` into `T`, falling back to `fallback(text)` when no structured
/// reading validates.
pub fn parse_structured<T, F>(
    ctx: &AgentContext<'_>,
    target: ParseTarget,
    text: &str,
    fallback: F,
) -> Parsed<T>
where
    T: DeserializeOwned,
    F: FnOnce(&str) -> T,
{
    match structured(ctx, target, text) {
        Some(value) => Parsed::Structured(value),
        None => {
            warn!(target = target.as_str(), "structured parse failed, using fallback");
            Parsed::Fallback(fallback(text))
        }
    }
}

fn structured<T: DeserializeOwned>(
    ctx: &AgentContext<'_>,
    target: ParseTarget,
    text: &str,
) -> Option<T> {
    match decode(target, text) {
        Ok(value) => return Some(value),
        Err(err) => debug!(target = target.as_str(), err = %err, "text is not structured"),
    }

    let llm = ctx.config.parser.llm.as_ref()?;
    let reply = ask_parser(ctx, llm, target, text).and_then(|reply| decode(target, &reply));
    match reply {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target = target.as_str(), err = %format!("{err:#}"), "parser model output rejected");
            None
        }
    }
}

fn ask_parser(
    ctx: &AgentContext<'_>,
    llm: &LlmConfig,
    target: ParseTarget,
    text: &str,
) -> Result<String> {
    let user = ctx.prompts.parser(&ParserPrompt {
        target: target.as_str(),
        schema: schema_for(target),
        text,
    })?;
    let request =
        CompletionRequest::new(llm, ctx.config.parser.system_prompt.as_str(), user).json_response();
    let completion = ctx
        .completion
        .complete(&request)
        .with_context(|| format!("parser completion for {}", target.as_str()))?;
    Ok(completion.text)
}

/// Extract, validate and deserialize a JSON record from `text`.
pub fn decode<T: DeserializeOwned>(target: ParseTarget, text: &str) -> Result<T> {
    let value = extract_json(text).ok_or_else(|| anyhow!("no JSON object found"))?;
    validate(target, &value)?;
    serde_json::from_value(value).with_context(|| format!("deserialize {}", target.as_str()))
}

fn validate(target: ParseTarget, value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_for(target))
        .with_context(|| format!("parse {} schema", target.as_str()))?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        bail!(
            "{} schema validation failed: {}",
            target.as_str(),
            messages.join("; ")
        );
    }
    Ok(())
}

/// A JSON object from raw text, a fenced block, or the outermost braces.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let candidates = [
        Some(trimmed),
        FENCED_JSON_RE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|body| body.as_str()),
        trimmed
            .find('{')
            .zip(trimmed.rfind('}'))
            .filter(|(start, end)| start < end)
            .map(|(start, end)| &trimmed[start..=end]),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find(Value::is_object)
}

/// Parser node: restates `task.problem` as the record named by `task.parse_target`.
pub fn run(ctx: &AgentContext<'_>, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let target = input
        .task
        .parse_target
        .ok_or_else(|| anyhow!("parser node {} has no parse target", input.node_id))?;
    let text = input.task.problem.as_str();
    let normalized = match structured::<Value>(ctx, target, text) {
        Some(value) => Normalized::Parsed(value),
        None => {
            warn!(node = input.node_id, target = target.as_str(), "parser node kept raw text");
            Normalized::Text(text.to_string())
        }
    };
    Ok(AgentOutput::finished(AgentType::Parser, text, Some(normalized)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExplorationQuestions, Goal, Task};
    use crate::io::config::RunConfig;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{InputFixture, PARSER, ScriptedCompletion};
    use serde_json::json;

    fn without_parser_llm() -> RunConfig {
        let mut config = RunConfig::default();
        config.parser.llm = None;
        config
    }

    #[test]
    fn extracts_raw_fenced_and_embedded_objects() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here:\n```json\n{\"a\": 2}\n```\nthanks"),
            Some(json!({"a": 2}))
        );
        assert_eq!(extract_json("prefix {\"a\": 3} suffix"), Some(json!({"a": 3})));
        assert_eq!(extract_json("\\frac{1}{2}"), None);
        assert_eq!(extract_json("[1, 2]"), None);
    }

    #[test]
    fn decode_rejects_schema_violations() {
        let ok: ExplorationQuestions =
            decode(ParseTarget::ExplorationQuestions, r#"{"questions": ["q1"]}"#).expect("decode");
        assert_eq!(ok.questions, vec!["q1".to_string()]);

        let err = decode::<ExplorationQuestions>(
            ParseTarget::ExplorationQuestions,
            r#"{"questions": "q1"}"#,
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("schema validation failed"));
    }

    /// Verifies the parser model is consulted only when direct decoding fails.
    #[test]
    fn parser_model_restates_unstructured_text() {
        let config = RunConfig::default();
        let completion = ScriptedCompletion::new()
            .on_text(PARSER, r#"{"title": "Lemma", "statement": "x > 0"}"#);
        let prompts = PromptEngine::new(10_000).expect("prompts");
        let ctx = AgentContext {
            config: &config,
            completion: &completion,
            prompts: &prompts,
        };

        let parsed: Parsed<Value> =
            parse_structured(&ctx, ParseTarget::KbSummary, "lemma: x > 0", |_| Value::Null);
        assert_eq!(parsed, Parsed::Structured(json!({"title": "Lemma", "statement": "x > 0"})));

        let direct: Parsed<Value> = parse_structured(
            &ctx,
            ParseTarget::KbSummary,
            r#"{"title": "T", "statement": "S"}"#,
            |_| Value::Null,
        );
        assert!(!direct.is_fallback());

        let requests = completion.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].response_format.is_some());
        assert!(requests[0].user_prompt().contains("kb_summary"));
    }

    #[test]
    fn falls_back_without_a_parser_model() {
        let config = without_parser_llm();
        let completion = ScriptedCompletion::new();
        let prompts = PromptEngine::new(10_000).expect("prompts");
        let ctx = AgentContext {
            config: &config,
            completion: &completion,
            prompts: &prompts,
        };
        let parsed = parse_structured(&ctx, ParseTarget::ExplorationQuestions, "1) why?", |text| {
            ExplorationQuestions {
                questions: vec![text.to_string()],
                rationales: Vec::new(),
            }
        });
        assert!(parsed.is_fallback());
        assert_eq!(parsed.into_inner().questions, vec!["1) why?".to_string()]);
        assert!(completion.requests().is_empty());
    }

    /// Verifies a failing parser model degrades to the fallback instead of erroring.
    #[test]
    fn parser_model_errors_use_fallback() {
        let mut config = RunConfig::default();
        config.parser.llm = Some(LlmConfig::new("m", 0.0));
        let completion = ScriptedCompletion::new().fail(PARSER, "rate limited");
        let prompts = PromptEngine::new(10_000).expect("prompts");
        let ctx = AgentContext {
            config: &config,
            completion: &completion,
            prompts: &prompts,
        };
        let parsed = parse_structured(&ctx, ParseTarget::KbSummary, "text", |_| 7);
        assert_eq!(parsed, Parsed::Fallback(7));
    }

    #[test]
    fn parser_node_returns_parsed_value_or_text() {
        let config = without_parser_llm();
        let completion = ScriptedCompletion::new();
        let prompts = PromptEngine::new(10_000).expect("prompts");
        let ctx = AgentContext {
            config: &config,
            completion: &completion,
            prompts: &prompts,
        };

        let mut task = Task::new(r#"{"questions": ["a", "b"]}"#, Goal::Parse);
        task.parse_target = Some(ParseTarget::ExplorationQuestions);
        let fixture = InputFixture::new(AgentType::Parser, task.clone());
        let output = run(&ctx, &fixture.input()).expect("parse node");
        assert_eq!(
            output.normalized,
            Some(Normalized::Parsed(json!({"questions": ["a", "b"]})))
        );

        task.problem = "not json".to_string();
        let fixture = InputFixture::new(AgentType::Parser, task.clone());
        let output = run(&ctx, &fixture.input()).expect("parse node");
        assert_eq!(output.normalized, Some(Normalized::Text("not json".to_string())));

        task.parse_target = None;
        let fixture = InputFixture::new(AgentType::Parser, task);
        assert!(run(&ctx, &fixture.input()).is_err());
    }
}
