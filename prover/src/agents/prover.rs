//! Prover agent: one candidate solution per activation.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::agents::AgentContext;
use crate::agents::parser::{Parsed, decode, parse_structured};
use crate::agents::tools::{parse_tool_calls, tool_definitions};
use crate::core::limits::{KB_SUMMARY_STATEMENT_CHARS, KB_SUMMARY_TITLE_CHARS};
use crate::core::text::{
    clean_solution_text, clip, format_local_context, make_kb_entry, prepare_kb_entries,
};
use crate::core::types::{
    AgentInput, AgentOutput, AgentType, KbEntry, Normalized, ParseTarget, SolutionAttempt,
};
use crate::io::completion::CompletionRequest;
use crate::io::prompt::{KbSummaryPrompt, ProverPrompt};

static OUTPUT_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)output type:\s*(plan|solution|error)").unwrap());
static PLAN_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)#\s*plan\b").unwrap());
static PLAN_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bplan\b").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-*]\s+").unwrap());
static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+[).\s]").unwrap());
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-*\d).\s]+").unwrap());

const AUTO_KB_TITLE: &str = "Auto-generated fact";

#[derive(Debug, Deserialize)]
struct KbSummary {
    title: String,
    statement: String,
}

#[instrument(skip_all, fields(node = input.node_id))]
pub fn run(ctx: &AgentContext<'_>, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let config = ctx.config;
    let task = input.task;
    let problem = if task.problem.trim().is_empty() {
        input.problem
    } else {
        task.problem.as_str()
    };

    let kb = input.kb.render_prompt();
    let local_context = format_local_context(input.local_context);
    let user = ctx.prompts.prover(&ProverPrompt {
        problem,
        step: task.step.as_deref(),
        parent_problem: task.parent_problem.as_deref(),
        feedback: task.feedback.as_deref(),
        hierarchy: input.context_hierarchy,
        local_context: &local_context,
        kb: &kb,
    })?;
    let request = CompletionRequest::new(&config.prover.llm, config.prover.system_prompt.as_str(), user)
        .with_tools(tool_definitions());
    let completion = ctx
        .completion
        .complete(&request)
        .context("prover completion")?;

    let actions = parse_tool_calls(&completion.tool_calls);
    let final_text = actions
        .finish_text
        .clone()
        .or_else(|| Some(completion.text.clone()).filter(|text| !text.trim().is_empty()))
        .unwrap_or_else(|| format!("Sketch solution for {problem}"));

    let mut attempt = match parse_structured(
        ctx,
        ParseTarget::SolutionAttempt,
        &final_text,
        parse_solution_attempt,
    ) {
        Parsed::Structured(attempt) => SolutionAttempt {
            final_answer: clean_solution_text(&attempt.final_answer),
            kb_updates: prepare_kb_entries(attempt.kb_updates),
            accepted: false,
            ..attempt
        },
        Parsed::Fallback(attempt) => attempt,
    };

    attempt.kb_updates = if !actions.kb_writes.is_empty() {
        prepare_kb_entries(actions.kb_writes)
    } else if attempt.kb_updates.is_empty() {
        prepare_kb_entries([make_kb_entry(input.node_id, AUTO_KB_TITLE, &final_text)])
    } else {
        attempt.kb_updates
    };
    attempt.kb_updates = summarize_kb_entries(ctx, problem, &final_text, attempt.kb_updates);

    // Children requested on a resumed activation would never let the attempt finish.
    let spawns = if input.local_context.is_empty() {
        actions.spawns
    } else {
        if !actions.spawns.is_empty() {
            warn!(dropped = actions.spawns.len(), "ignoring spawns from resumed prover");
        }
        Vec::new()
    };

    debug!(
        outline_steps = attempt.outline_steps.len(),
        kb_updates = attempt.kb_updates.len(),
        spawns = spawns.len(),
        "prover attempt ready"
    );
    Ok(AgentOutput::spawning(
        AgentType::Prover,
        attempt.final_answer.clone(),
        Some(Normalized::Solution(attempt)),
        spawns,
    ))
}

/// Deterministic reading of a prover document.
///
/// `Output type: Plan` documents yield their bullet or numbered lines as
/// outline steps; `Output type: Error` marks a claimed-false statement.
pub fn parse_solution_attempt(text: &str) -> SolutionAttempt {
    let output_type = OUTPUT_TYPE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|kind| kind.as_str().to_ascii_lowercase())
        .unwrap_or_else(|| "solution".to_string());

    let outline_steps = if output_type == "plan" {
        plan_steps(text)
    } else {
        Vec::new()
    };

    SolutionAttempt {
        final_answer: clean_solution_text(text),
        outline_steps,
        kb_updates: Vec::new(),
        claims_incorrect_conclusion: output_type == "error",
        accepted: false,
    }
}

fn plan_steps(text: &str) -> Vec<String> {
    let section_after = |re: &Regex| {
        re.find(text)
            .map(|found| text[found.end()..].trim())
            .filter(|rest| !rest.is_empty())
    };
    let plan = section_after(&PLAN_HEADING_RE)
        .or_else(|| section_after(&PLAN_WORD_RE))
        .unwrap_or(text);

    plan.lines()
        .filter(|line| BULLET_RE.is_match(line) || NUMBERED_RE.is_match(line))
        .map(|line| MARKER_RE.replace(line, "").trim().to_string())
        .filter(|step| !step.is_empty())
        .collect()
}

/// Restate draft entries as short statements when a summarizer model is configured.
fn summarize_kb_entries(
    ctx: &AgentContext<'_>,
    problem: &str,
    source: &str,
    entries: Vec<KbEntry>,
) -> Vec<KbEntry> {
    let summarizer = &ctx.config.kb_summarizer;
    let Some(llm) = summarizer.llm.as_ref() else {
        return entries;
    };

    entries
        .into_iter()
        .map(|entry| {
            let summary = ctx
                .prompts
                .kb_summary(&KbSummaryPrompt {
                    problem,
                    id: &entry.id,
                    kind: entry.kind.as_str(),
                    title: &entry.title,
                    content: &entry.content,
                    source,
                })
                .and_then(|user| {
                    let request =
                        CompletionRequest::new(llm, summarizer.system_prompt.as_str(), user)
                            .json_response();
                    ctx.completion.complete(&request)
                })
                .and_then(|completion| decode::<KbSummary>(ParseTarget::KbSummary, &completion.text));
            match summary {
                Ok(summary) => KbEntry {
                    title: clip(&summary.title, KB_SUMMARY_TITLE_CHARS),
                    content: clip(&summary.statement, KB_SUMMARY_STATEMENT_CHARS),
                    ..entry
                },
                Err(err) => {
                    warn!(id = %entry.id, err = %format!("{err:#}"), "kb summary failed, keeping draft");
                    entry
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ContextItem, Goal, KbKind, SpawnRequest, Task};
    use crate::io::completion::{Completion, ToolCall};
    use crate::io::config::RunConfig;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{
        InputFixture, KB_SUMMARIZER, PROVER, ScriptedCompletion, attempt_item, finish_call,
    };
    use serde_json::json;

    fn plain_config() -> RunConfig {
        let mut config = RunConfig::default();
        config.parser.llm = None;
        config.kb_summarizer.llm = None;
        config
    }

    fn run_prover(
        config: &RunConfig,
        completion: &ScriptedCompletion,
        fixture: &InputFixture,
    ) -> AgentOutput {
        let prompts = PromptEngine::new(60_000).expect("prompts");
        let ctx = AgentContext {
            config,
            completion,
            prompts: &prompts,
        };
        run(&ctx, &fixture.input()).expect("prover")
    }

    #[test]
    fn fallback_reads_plan_steps() {
        let attempt = parse_solution_attempt(
            "Output type: Plan\n\nPlan:\n- Step 1: bound the sum\n2) Conclude by induction\n* \n",
        );
        assert_eq!(
            attempt.outline_steps,
            vec!["Step 1: bound the sum".to_string(), "Conclude by induction".to_string()]
        );
        assert!(!attempt.claims_incorrect_conclusion);
        assert!(attempt.final_answer.starts_with("Plan:"));
    }

    #[test]
    fn fallback_flags_error_outputs() {
        let attempt = parse_solution_attempt("Output type: Error\n\nReason:\nn = 2 is a counterexample.");
        assert!(attempt.claims_incorrect_conclusion);
        assert!(attempt.outline_steps.is_empty());

        let solution = parse_solution_attempt("Just the answer: 4.");
        assert_eq!(solution.final_answer, "Just the answer: 4.");
        assert!(!solution.claims_incorrect_conclusion);
    }

    /// Verifies finish text wins and an auto-generated Result entry rides on the attempt.
    #[test]
    fn finish_tool_supplies_final_text() {
        let config = plain_config();
        let completion = ScriptedCompletion::new().on(
            PROVER,
            Completion {
                text: "ignored".to_string(),
                tool_calls: vec![ToolCall::new(
                    "finish",
                    json!({"output_text": "Output type: Solution\n\nSolution:\nWe get $x = 2$."}),
                )],
            },
        );
        let fixture = InputFixture::new(AgentType::Prover, Task::new("Solve x + 1 = 3.", Goal::Solve));
        let output = run_prover(&config, &completion, &fixture);

        let attempt = output.solution().expect("solution");
        assert_eq!(attempt.final_answer, "We get $x = 2$.");
        assert!(!attempt.accepted);
        assert_eq!(attempt.kb_updates.len(), 1);
        assert_eq!(attempt.kb_updates[0].id, "Result 2");
        assert_eq!(attempt.kb_updates[0].content, "We get $x = 2$.");
        assert!(output.kb_writes.is_empty());
        assert!(output.spawn_requests.is_empty());

        let request = &completion.requests()[0];
        assert_eq!(request.tools.len(), 3);
        assert!(request.user_prompt().contains("Solve x + 1 = 3."));
    }

    #[test]
    fn empty_completion_yields_sketch() {
        let config = plain_config();
        let completion = ScriptedCompletion::new().on_text(PROVER, "  ");
        let fixture = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let output = run_prover(&config, &completion, &fixture);
        assert_eq!(output.raw_text, "Sketch solution for P");
    }

    /// Verifies structured JSON answers are used as-is and cannot self-accept.
    #[test]
    fn structured_answer_is_normalized() {
        let config = plain_config();
        let completion = ScriptedCompletion::new().on_text(
            PROVER,
            r#"{"final_answer": "Solution:\nDone.", "outline_steps": ["a"], "accepted": true,
                "kb_updates": [{"id": "L1", "kind": "lemma", "title": "Key", "content": "x > 0"}]}"#,
        );
        let fixture = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let attempt = run_prover(&config, &completion, &fixture)
            .solution()
            .cloned()
            .expect("solution");
        assert_eq!(attempt.final_answer, "Done.");
        assert_eq!(attempt.outline_steps, vec!["a".to_string()]);
        assert!(!attempt.accepted);
        assert_eq!(attempt.kb_updates[0].id, "L1");
        assert_eq!(attempt.kb_updates[0].kind, KbKind::Result);
    }

    #[test]
    fn kb_write_tool_replaces_parsed_updates() {
        let config = plain_config();
        let completion = ScriptedCompletion::new().on(
            PROVER,
            Completion {
                text: "Output type: Solution\n\nSolution:\nDone.".to_string(),
                tool_calls: vec![ToolCall::new(
                    "kb_write",
                    json!({"entries": [{"id": "D1", "kind": "Definition", "title": "Norm", "content": "|x|"}]}),
                )],
            },
        );
        let fixture = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let attempt = run_prover(&config, &completion, &fixture)
            .solution()
            .cloned()
            .expect("solution");
        assert_eq!(attempt.kb_updates.len(), 1);
        assert_eq!(attempt.kb_updates[0].id, "D1");
        assert_eq!(attempt.kb_updates[0].kind, KbKind::Definition);
    }

    /// Verifies the summarizer rewrites entries and clips them.
    #[test]
    fn summarizer_rewrites_kb_entries() {
        let mut config = plain_config();
        config.kb_summarizer.llm = RunConfig::default().kb_summarizer.llm;
        let long = "s".repeat(400);
        let completion = ScriptedCompletion::new()
            .on(PROVER, finish_call("Output type: Solution\n\nSolution:\nLong proof."))
            .on_text(
                KB_SUMMARIZER,
                &format!(r#"{{"title": "Short", "statement": "{long}"}}"#),
            );
        let fixture = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let attempt = run_prover(&config, &completion, &fixture)
            .solution()
            .cloned()
            .expect("solution");
        assert_eq!(attempt.kb_updates[0].title, "Short");
        assert_eq!(attempt.kb_updates[0].content.chars().count(), KB_SUMMARY_STATEMENT_CHARS);
        assert_eq!(completion.requests_for(KB_SUMMARIZER).len(), 1);
    }

    #[test]
    fn summarizer_failure_keeps_draft() {
        let mut config = plain_config();
        config.kb_summarizer.llm = RunConfig::default().kb_summarizer.llm;
        let completion = ScriptedCompletion::new()
            .on(PROVER, finish_call("Solution:\nFinal."))
            .on_text(KB_SUMMARIZER, "not json");
        let fixture = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let attempt = run_prover(&config, &completion, &fixture)
            .solution()
            .cloned()
            .expect("solution");
        assert_eq!(attempt.kb_updates[0].content, "Final.");
    }

    /// Verifies tool spawns are forwarded once and dropped after resuming.
    #[test]
    fn spawns_forward_only_on_first_activation() {
        let config = plain_config();
        let spawn = ToolCall::new(
            "spawn_agent",
            json!({"agent_type": "worker", "task": {"problem": "lemma"}}),
        );
        let completion = ScriptedCompletion::new().on(
            PROVER,
            Completion {
                text: "Output type: Solution\n\nSolution:\nUses the lemma.".to_string(),
                tool_calls: vec![spawn],
            },
        );

        let fresh = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve));
        let output = run_prover(&config, &completion, &fresh);
        assert_eq!(
            output.spawn_requests,
            vec![SpawnRequest::new(AgentType::Worker, Task::new("lemma", Goal::Solve))]
        );

        let context: Vec<ContextItem> = vec![attempt_item(3, 1, SolutionAttempt::from_text("lemma holds"))];
        let resumed = InputFixture::new(AgentType::Prover, Task::new("P", Goal::Solve)).with_context(context);
        let output = run_prover(&config, &completion, &resumed);
        assert!(output.spawn_requests.is_empty());
        assert!(completion.requests()[1].user_prompt().contains("lemma holds"));
    }
}
