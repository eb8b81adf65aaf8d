//! One end-to-end run: build the agents, drive the scheduler, render the report.

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::agents::{AgentContext, AgentSet};
use crate::io::completion::CompletionService;
use crate::io::config::RunConfig;
use crate::io::prompt::PromptEngine;
use crate::io::report::render_report;
use crate::io::trace::TraceSink;
use crate::scheduler::{Run, RunOutcome};

/// Result of [`run_problem`].
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub outcome: RunOutcome,
    /// Rendered Markdown report, produced for failed runs too.
    pub report: String,
    pub steps: u32,
    pub kb_entries: usize,
}

impl SolveReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Solve `problem` with `config`, calling models through `completion`.
///
/// `max_steps` overrides `orchestrator.max_total_steps`. Agent failures and an
/// exhausted budget end in a failed outcome with a report; `Err` is reserved
/// for setup problems and scheduler invariant violations.
#[instrument(skip_all, fields(config = %config.name))]
pub fn run_problem(
    config: &RunConfig,
    completion: &dyn CompletionService,
    problem: &str,
    trace: Box<dyn TraceSink>,
    max_steps: Option<u32>,
) -> Result<SolveReport> {
    config.validate()?;
    let prompts = PromptEngine::new(config.prompt.budget_bytes)?;
    let agents = AgentSet::new(AgentContext {
        config,
        completion,
        prompts: &prompts,
    });
    let max_steps = max_steps.unwrap_or(config.orchestrator.max_total_steps);
    if max_steps == 0 {
        bail!("step budget must be at least 1");
    }

    let mut run = Run::new(problem, &config.name, trace);
    let outcome = run.run_to_completion(&agents, max_steps)?;
    let report = render_report(
        problem,
        run.best_attempt().as_ref(),
        &run.kb().render_appendix(),
        &outcome,
    );
    info!(
        steps = run.steps(),
        kb_entries = run.kb().len(),
        success = outcome.is_success(),
        "problem finished"
    );
    Ok(SolveReport {
        outcome,
        report,
        steps: run.steps(),
        kb_entries: run.kb().len(),
    })
}
