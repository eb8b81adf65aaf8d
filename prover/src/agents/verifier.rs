//! Verifier agent: an ensemble vote over every attempt in the task.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::agents::AgentContext;
use crate::core::acceptance::decide;
use crate::core::types::{AgentInput, AgentOutput, AgentType, Normalized, VerificationReport};
use crate::io::completion::CompletionRequest;
use crate::io::prompt::VerifierPrompt;

static VERDICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)verdict:\s*(correct|incorrect)").unwrap());
static REASON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)reason\s*:\s*(.*)").unwrap());

/// One ensemble member's judgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// `None` when the reply carried no recognizable verdict.
    pub correct: Option<bool>,
    pub reason: String,
}

/// Read `Verdict: Correct|Incorrect` and the `Reason:` section from a reply.
pub fn parse_vote(text: &str) -> Vote {
    let correct = VERDICT_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|verdict| verdict.as_str().eq_ignore_ascii_case("correct"));
    let reason = REASON_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|reason| reason.as_str().trim())
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| text.trim());
    Vote {
        correct,
        reason: reason.to_string(),
    }
}

#[instrument(skip_all, fields(node = input.node_id, attempts = input.task.attempts.len()))]
pub fn run(ctx: &AgentContext<'_>, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let config = &ctx.config.verifier;
    let attempts = &input.task.attempts;
    let problem = if input.task.problem.trim().is_empty() {
        input.problem
    } else {
        input.task.problem.as_str()
    };
    let members = &config.llms[..config.llms.len().min(config.ensemble_size as usize)];
    let kb = input.kb.render_prompt();

    let mut scores = Vec::with_capacity(attempts.len());
    let mut critiques = Vec::with_capacity(attempts.len());
    for (index, attempt) in attempts.iter().enumerate() {
        let user = ctx.prompts.verifier(&VerifierPrompt {
            problem,
            attempt: &attempt.final_answer,
            hierarchy: input.context_hierarchy,
            kb: &kb,
        })?;

        let mut votes = 0u32;
        let mut reasons = Vec::with_capacity(members.len());
        for llm in members {
            let request = CompletionRequest::new(llm, config.system_prompt.as_str(), user.as_str());
            match ctx.completion.complete(&request) {
                Ok(completion) => {
                    let vote = parse_vote(&completion.text);
                    if vote.correct.is_none() {
                        warn!(attempt = index, model = %llm.model, "verifier reply has no verdict");
                    }
                    if vote.correct == Some(true) {
                        votes += 1;
                    }
                    reasons.push(vote.reason);
                }
                Err(err) => {
                    warn!(attempt = index, model = %llm.model, err = %format!("{err:#}"), "verifier call failed");
                    reasons.push(format!("verifier unavailable: {err:#}"));
                }
            }
        }
        debug!(attempt = index, votes, "attempt scored");
        scores.push(votes);
        critiques.push(reasons.join(" | "));
    }

    let decision = decide(&scores, config.ensemble_size);
    let global_feedback = if attempts.is_empty() {
        "No attempts were submitted for verification.".to_string()
    } else {
        critiques
            .iter()
            .zip(&scores)
            .enumerate()
            .map(|(index, (critique, votes))| {
                format!("Attempt {index} ({votes}/{}): {critique}", config.ensemble_size)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let report = VerificationReport {
        accepted: decision.accepted,
        best_attempt_index: decision.best,
        attempt_scores: scores,
        attempt_critiques: critiques,
        global_feedback,
        attempts: attempts.clone(),
    };
    let verdict = if report.accepted { "accepted" } else { "rejected" };
    let raw = format!(
        "Verification {verdict}; best attempt {:?} with {} of {} votes.",
        report.best_attempt_index, decision.votes, config.ensemble_size
    );
    Ok(AgentOutput::finished(
        AgentType::Verifier,
        raw,
        Some(Normalized::Verification(report)),
    ))
}
