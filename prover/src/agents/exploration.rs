//! Exploration agent: proposes questions, delegates each to a worker, and
//! records the answers in the knowledge base.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::AgentContext;
use crate::agents::parser::{Parsed, parse_structured};
use crate::agents::tools::{parse_tool_calls, tool_definitions};
use crate::core::limits::KB_MAX_FIELD_CHARS;
use crate::core::text::{extract_result_snippet, normalize_block};
use crate::core::types::{
    AgentInput, AgentOutput, AgentType, ContextItem, ExplorationQuestions, Goal, KbEntry, KbKind,
    Normalized, ParseTarget, SpawnRequest, Task,
};
use crate::io::completion::CompletionRequest;
use crate::io::prompt::ExplorationPrompt;

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*]|\d+[.)])\s*").unwrap());

const NO_ANSWER: &str = "No worker response was produced.";

/// Read one question per non-empty line, dropping list markers and headings.
pub fn parse_question_list(text: &str, max_questions: usize) -> ExplorationQuestions {
    let mut questions: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("questions:"))
        .map(|line| LIST_MARKER_RE.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if questions.is_empty() && !text.trim().is_empty() {
        questions.push(text.trim().to_string());
    }
    questions.truncate(max_questions);
    ExplorationQuestions {
        rationales: vec![String::new(); questions.len()],
        questions,
    }
}

/// Drop blank questions, cap the count and pair every question with a rationale.
fn normalize_questions(parsed: ExplorationQuestions, max_questions: usize) -> ExplorationQuestions {
    let questions: Vec<String> = parsed
        .questions
        .iter()
        .map(|question| question.trim().to_string())
        .filter(|question| !question.is_empty())
        .take(max_questions)
        .collect();
    let rationales = questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            parsed
                .rationales
                .get(index)
                .map(|rationale| rationale.trim())
                .filter(|rationale| !rationale.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Rationale for: {question}"))
        })
        .collect();
    ExplorationQuestions {
        questions,
        rationales,
    }
}

#[instrument(skip_all, fields(node = input.node_id))]
pub fn run(ctx: &AgentContext<'_>, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let problem = if input.task.problem.trim().is_empty() {
        input.problem
    } else {
        input.task.problem.as_str()
    };
    let answers: Vec<&ContextItem> = input
        .local_context
        .iter()
        .filter(|item| item.agent_type == AgentType::Worker)
        .collect();
    if answers.is_empty() {
        propose(ctx, input, problem)
    } else {
        Ok(record_answers(input, &answers))
    }
}

fn propose(ctx: &AgentContext<'_>, input: &AgentInput<'_>, problem: &str) -> Result<AgentOutput> {
    let config = &ctx.config.exploration;
    let system = ctx
        .prompts
        .system(&config.system_prompt, json!({ "max_questions": config.max_questions }))?;
    let kb = input.kb.render_prompt();
    let user = ctx.prompts.exploration(&ExplorationPrompt {
        problem,
        hierarchy: input.context_hierarchy,
        kb: &kb,
    })?;
    let request = CompletionRequest::new(&config.llm, system, user).with_tools(tool_definitions());
    let completion = ctx
        .completion
        .complete(&request)
        .context("exploration completion")?;
    let text = parse_tool_calls(&completion.tool_calls)
        .finish_text
        .unwrap_or(completion.text);

    let parsed = parse_structured(ctx, ParseTarget::ExplorationQuestions, &text, |text| {
        parse_question_list(text, config.max_questions)
    });
    let questions = match parsed {
        Parsed::Structured(questions) => normalize_questions(questions, config.max_questions),
        Parsed::Fallback(questions) => questions,
    };
    if questions.questions.is_empty() {
        warn!("exploration produced no questions");
        return Ok(AgentOutput::finished(
            AgentType::Exploration,
            text,
            Some(Normalized::Questions(questions)),
        ));
    }

    let total = questions.questions.len();
    let spawns = questions
        .questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            let rationale = questions
                .rationales
                .get(index)
                .filter(|rationale| !rationale.trim().is_empty())
                .cloned();
            let task = Task {
                parent_problem: Some(problem.to_string()),
                question_index: Some(index + 1),
                rationale,
                exploration_round: input.task.exploration_round,
                ..Task::new(question.as_str(), Goal::Explore)
            };
            SpawnRequest::new(AgentType::Worker, task)
        })
        .collect();
    info!(questions = total, "delegating exploration questions");
    Ok(AgentOutput::spawning(
        AgentType::Exploration,
        text,
        Some(Normalized::Questions(questions)),
        spawns,
    ))
}

fn answer_text(item: &ContextItem) -> String {
    let answer = match (item.solution(), item.output()) {
        (Some(attempt), _) => extract_result_snippet(&attempt.final_answer, KB_MAX_FIELD_CHARS),
        (None, Some(output)) => output.raw_text.trim().to_string(),
        (None, None) => String::new(),
    };
    if answer.trim().is_empty() {
        NO_ANSWER.to_string()
    } else {
        answer.trim().to_string()
    }
}

fn record_answers(input: &AgentInput<'_>, answers: &[&ContextItem]) -> AgentOutput {
    let node = input.node_id;
    let mut questions = ExplorationQuestions::default();
    let entries: Vec<KbEntry> = answers
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item.task.question_index.unwrap_or(position + 1);
            let question = item.task.problem.trim();
            let rationale = item.task.rationale.as_deref().map(str::trim).unwrap_or_default();
            questions.questions.push(question.to_string());
            questions.rationales.push(rationale.to_string());

            let mut content = format!("**Question {index}:** {question}");
            if !rationale.is_empty() {
                content.push_str(&format!("\n\n**Rationale:** {rationale}"));
            }
            content.push_str(&format!("\n\n**Answer:**\n{}", answer_text(item)));
            KbEntry::new(
                format!("Exploration {node}.{index}"),
                KbKind::Result,
                format!("Exploration Q{index}: {question}"),
                normalize_block(&content, KB_MAX_FIELD_CHARS),
            )
            .with_tag("exploration")
            .with_source(format!("agent-{node}"))
        })
        .collect();
    info!(entries = entries.len(), "exploration answers recorded");
    AgentOutput::finished(
        AgentType::Exploration,
        "exploration complete",
        Some(Normalized::Questions(questions)),
    )
    .with_kb_writes(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SolutionAttempt;
    use crate::io::config::RunConfig;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{
        EXPLORATION, InputFixture, ScriptedCompletion, failed_item, finish_call, output_item,
    };

    fn explore(config: &RunConfig, completion: &ScriptedCompletion, fixture: &InputFixture) -> AgentOutput {
        let prompts = PromptEngine::new(60_000).expect("prompts");
        let ctx = AgentContext {
            config,
            completion,
            prompts: &prompts,
        };
        run(&ctx, &fixture.input()).expect("exploration")
    }

    fn fixture() -> InputFixture {
        let task = Task {
            exploration_round: Some(1),
            ..Task::new("Prove P.", Goal::Explore)
        };
        InputFixture::new(AgentType::Exploration, task)
    }

    #[test]
    fn question_list_strips_markers() {
        let parsed = parse_question_list("Questions:\n1) Is x odd?\n- Is y prime?\n\n* Why?", 2);
        assert_eq!(parsed.questions, vec!["Is x odd?", "Is y prime?"]);
        assert_eq!(parsed.rationales.len(), 2);
    }

    /// Verifies structured questions spawn one explore worker each, in order.
    #[test]
    fn structured_questions_spawn_workers_in_order() {
        let mut config = RunConfig::default();
        config.exploration.max_questions = 2;
        let completion = ScriptedCompletion::new().on(
            EXPLORATION,
            finish_call(r#"{"questions": ["Q one", " ", "Q two", "Q three"], "rationales": ["because"]}"#),
        );
        let output = explore(&config, &completion, &fixture());

        let tasks: Vec<&Task> = output.spawn_requests.iter().map(|r| &r.task).collect();
        assert_eq!(tasks.len(), 2);
        assert!(output.spawn_requests.iter().all(|r| r.agent_type == AgentType::Worker));
        assert_eq!(tasks[0].problem, "Q one");
        assert_eq!(tasks[0].goal, Goal::Explore);
        assert_eq!(tasks[0].question_index, Some(1));
        assert_eq!(tasks[0].rationale.as_deref(), Some("because"));
        assert_eq!(tasks[0].parent_problem.as_deref(), Some("Prove P."));
        assert_eq!(tasks[0].exploration_round, Some(1));
        assert_eq!(tasks[1].problem, "Q two");
        assert_eq!(tasks[1].rationale.as_deref(), Some("Rationale for: Q two"));

        let request = &completion.requests()[0];
        assert!(request.system_prompt().contains("at most 2"));
        assert!(request.user_prompt().contains("Prove P."));
    }

    #[test]
    fn unstructured_reply_uses_the_line_fallback() {
        let mut config = RunConfig::default();
        config.parser.llm = None;
        let completion = ScriptedCompletion::new().on_text(EXPLORATION, "Questions:\n1) Small cases?\n2) Parity?");
        let output = explore(&config, &completion, &fixture());
        let problems: Vec<&str> = output
            .spawn_requests
            .iter()
            .map(|r| r.task.problem.as_str())
            .collect();
        assert_eq!(problems, vec!["Small cases?", "Parity?"]);
    }

    #[test]
    fn empty_reply_finishes_without_workers() {
        let mut config = RunConfig::default();
        config.parser.llm = None;
        let completion = ScriptedCompletion::new().on_text(EXPLORATION, "   ");
        let output = explore(&config, &completion, &fixture());
        assert!(output.spawn_requests.is_empty());
        assert!(output.kb_writes.is_empty());
    }

    /// Verifies answers become tagged KB entries and failures are recorded as missing.
    #[test]
    fn answers_are_written_to_the_kb() {
        let question = |index: usize, text: &str, rationale: Option<&str>| Task {
            question_index: Some(index),
            rationale: rationale.map(str::to_string),
            ..Task::new(text, Goal::Explore)
        };
        let fixture = fixture().with_context(vec![
            output_item(
                3,
                1,
                question(1, "Is n even?", Some("parity")),
                AgentOutput::finished(
                    AgentType::Worker,
                    "",
                    Some(Normalized::Solution(SolutionAttempt::from_text("Yes, n is even."))),
                ),
            ),
            failed_item(4, 1, AgentType::Worker, question(2, "Is n prime?", None), "budget"),
        ]);
        let config = RunConfig::default();
        let completion = ScriptedCompletion::new();
        let output = explore(&config, &completion, &fixture);

        assert!(completion.requests().is_empty());
        assert_eq!(output.kb_writes.len(), 2);
        let first = &output.kb_writes[0];
        assert_eq!(first.id, "Exploration 2.1");
        assert_eq!(first.kind, KbKind::Result);
        assert_eq!(first.title, "Exploration Q1: Is n even?");
        assert!(first.tags.contains("exploration"));
        assert_eq!(
            first.content,
            "**Question 1:** Is n even?\n\n**Rationale:** parity\n\n**Answer:**\nYes, n is even."
        );
        let second = &output.kb_writes[1];
        assert_eq!(second.id, "Exploration 2.2");
        assert!(second.content.ends_with(NO_ANSWER));
        assert!(!second.content.contains("Rationale"));
    }
}
