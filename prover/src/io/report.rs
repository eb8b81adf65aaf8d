//! Final Markdown report for a run.

use std::path::Path;

use anyhow::Result;
use tracing::instrument;

use crate::core::types::SolutionAttempt;
use crate::io::config::write_atomic;
use crate::scheduler::RunOutcome;

const NO_SOLUTION: &str = "No solution was produced.";
const NO_KB_ENTRIES: &str = "No KB entries.";

/// Render the report from the problem, the accepted-or-best attempt and the KB appendix.
pub fn render_report(
    problem: &str,
    attempt: Option<&SolutionAttempt>,
    appendix: &str,
    outcome: &RunOutcome,
) -> String {
    let answer = attempt
        .map(|attempt| attempt.final_answer.trim())
        .filter(|answer| !answer.is_empty());

    let solution = match outcome {
        RunOutcome::Succeeded(_) => answer.unwrap_or(NO_SOLUTION).to_string(),
        RunOutcome::Failed(reason) => match answer {
            Some(answer) => format!("**Run failed:** {reason}\n\nBest output so far:\n\n{answer}"),
            None => format!("**Run failed:** {reason}\n\n{NO_SOLUTION}"),
        },
    };
    let appendix = match appendix.trim() {
        "" => NO_KB_ENTRIES,
        text => text,
    };

    format!(
        "# Problem\n\n{}\n\n# Solution\n\n{}\n\n# KB Appendix\n\n{}\n",
        problem.trim(),
        solution,
        appendix
    )
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_report(path: &Path, report: &str) -> Result<()> {
    write_atomic(path, report)
}
