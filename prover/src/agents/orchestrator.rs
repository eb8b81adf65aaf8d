//! Root agent: exploration rounds first, then one solve worker.

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::core::types::{
    AgentInput, AgentOutput, AgentType, ContextResult, Goal, Normalized, OrchestratorPhase,
    OrchestratorStatus, SolutionAttempt, SpawnRequest, Task,
};
use crate::io::config::OrchestratorConfig;

fn status(phase: OrchestratorPhase, round_index: Option<u32>, message: String) -> Normalized {
    Normalized::OrchestratorStatus(OrchestratorStatus {
        phase,
        round_index,
        message,
    })
}

pub fn run(config: &OrchestratorConfig, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let problem = input.problem;
    let explored = input
        .local_context
        .iter()
        .filter(|item| item.agent_type == AgentType::Exploration)
        .inspect(|item| {
            if let Some(reason) = item.failure() {
                warn!(node = item.from, reason, "exploration round failed, continuing");
            }
        })
        .count() as u32;

    if explored < config.exploration_rounds {
        let round = explored + 1;
        let message = format!("spawning exploration round {round}");
        info!(round, total = config.exploration_rounds, "exploration round");
        let task = Task {
            exploration_round: Some(round),
            ..Task::new(problem, Goal::Explore)
        };
        return Ok(AgentOutput::spawning(
            AgentType::Orchestrator,
            message.clone(),
            Some(status(OrchestratorPhase::Exploration, Some(round), message)),
            vec![SpawnRequest::new(AgentType::Exploration, task)],
        ));
    }

    let Some(worker) = input
        .local_context
        .iter()
        .rev()
        .find(|item| item.agent_type == AgentType::Worker)
    else {
        let message = "spawning solve worker".to_string();
        return Ok(AgentOutput::spawning(
            AgentType::Orchestrator,
            message.clone(),
            Some(status(OrchestratorPhase::Solve, None, message)),
            vec![SpawnRequest::new(
                AgentType::Worker,
                Task::new(problem, Goal::Solve),
            )],
        ));
    };

    let output = match &worker.result {
        ContextResult::Output(output) => output,
        ContextResult::Failed { reason } => bail!("solve worker {} failed: {reason}", worker.from),
    };
    let solution = output
        .solution()
        .cloned()
        .unwrap_or_else(|| SolutionAttempt::from_text(output.raw_text.trim()));
    Ok(AgentOutput::finished(
        AgentType::Orchestrator,
        solution.final_answer.clone(),
        Some(Normalized::Solution(solution)),
    ))
}
