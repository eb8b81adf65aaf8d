//! Generation–verification controller for worker and sub-worker nodes.
//!
//! A worker never keeps state between activations. Each activation replays
//! its routed child results, grouped by spawn batch, into a [`Ledger`] and
//! decides the next move from it:
//!
//! ```text
//! start ──► provers ──► verifier ──► accepted ──► finish (accepted)
//!              ▲            │
//!              │            └─► rejected ─┬─► rounds left, plan ──► sub-workers ──► verifier
//!              └──────────────────────────┤
//!                                         └─► rounds exhausted ──► finish (unverified)
//! ```
//!
//! A round in which every prover failed counts as an exhausted round. A
//! synthesized decomposition attempt replaces fresh prover attempts in the
//! verify round that follows it.

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::core::text::{make_kb_entry, prepare_kb_entries};
use crate::core::types::{
    AgentInput, AgentOutput, AgentType, ContextItem, ContextResult, Goal, Normalized,
    SolutionAttempt, SpawnRequest, Task, WorkerMode, WorkerPhase, WorkerStatus,
};
use crate::io::config::WorkerConfig;

const AUTO_KB_TITLE: &str = "Auto-generated fact";

/// Best attempt seen so far and the votes it received.
#[derive(Debug, Clone)]
struct Scored {
    votes: u32,
    attempt: SolutionAttempt,
}

/// What the latest resolved batch asks the worker to do next.
#[derive(Debug, Clone, Default)]
enum Next {
    #[default]
    Start,
    /// Every prover of the last round failed.
    RoundAborted,
    Verify(Vec<SolutionAttempt>),
    Accepted(SolutionAttempt),
    /// Verifier rejected (or failed); `plan` is the best candidate plan.
    Rejected { plan: Vec<String> },
}

#[derive(Debug, Clone, Default)]
struct Ledger {
    /// Verify rounds finished, aborted rounds included.
    rounds: u32,
    feedback: Option<String>,
    mode: WorkerMode,
    best: Option<Scored>,
    next: Next,
}

impl Ledger {
    fn replay(local_context: &[ContextItem]) -> Result<Self> {
        let mut ledger = Ledger::default();
        for batch in local_context.chunk_by(|a, b| a.batch == b.batch) {
            ledger.apply(batch)?;
        }
        Ok(ledger)
    }

    fn apply(&mut self, batch: &[ContextItem]) -> Result<()> {
        let only = |agent_type: AgentType| batch.iter().all(|item| item.agent_type == agent_type);
        if only(AgentType::Prover) {
            self.apply_provers(batch);
        } else if only(AgentType::SubWorker) {
            self.apply_steps(batch);
        } else if let [item] = batch
            && item.agent_type == AgentType::Verifier
        {
            self.apply_verification(item);
        } else {
            let types: Vec<&str> = batch.iter().map(|item| item.agent_type.as_str()).collect();
            bail!("worker received an unexpected batch of children: {}", types.join(", "));
        }
        Ok(())
    }

    fn apply_provers(&mut self, batch: &[ContextItem]) {
        let attempts: Vec<SolutionAttempt> =
            batch.iter().filter_map(ContextItem::solution).cloned().collect();
        let failed = batch.len() - attempts.len();
        if failed > 0 {
            warn!(failed, total = batch.len(), "prover attempts failed");
        }
        self.next = if attempts.is_empty() {
            self.rounds += 1;
            Next::RoundAborted
        } else {
            Next::Verify(attempts)
        };
    }

    fn apply_steps(&mut self, batch: &[ContextItem]) {
        let steps: Vec<String> = batch
            .iter()
            .map(|item| item.task.problem.clone())
            .collect();
        self.mode = WorkerMode::Decomposing {
            steps: steps.clone(),
        };
        self.next = Next::Verify(vec![synthesize_steps(batch, steps)]);
    }

    fn apply_verification(&mut self, item: &ContextItem) {
        self.rounds += 1;
        let report = match &item.result {
            ContextResult::Output(output) => output.report(),
            ContextResult::Failed { .. } => None,
        };
        let Some(report) = report else {
            warn!(verifier = item.from, "verification produced no report, rejecting round");
            if self.best.is_none()
                && let Some(attempt) = item.task.attempts.first()
            {
                self.best = Some(Scored {
                    votes: 0,
                    attempt: attempt.clone(),
                });
            }
            self.next = Next::Rejected {
                plan: plan_of(&item.task.attempts, None),
            };
            return;
        };

        if let (Some(attempt), Some(votes)) = (report.best_attempt(), report.best_score())
            && self.best.as_ref().is_none_or(|best| votes > best.votes)
        {
            self.best = Some(Scored {
                votes,
                attempt: attempt.clone(),
            });
        }
        self.next = match report.best_attempt() {
            Some(attempt) if report.accepted => Next::Accepted(attempt.clone()),
            _ => {
                let feedback = report.global_feedback.trim();
                if !feedback.is_empty() {
                    self.feedback = Some(feedback.to_string());
                }
                Next::Rejected {
                    plan: plan_of(&report.attempts, report.best_attempt_index),
                }
            }
        };
    }
}

/// Plan steps of the preferred attempt, else of the first attempt that has any.
fn plan_of(attempts: &[SolutionAttempt], preferred: Option<usize>) -> Vec<String> {
    preferred
        .and_then(|index| attempts.get(index))
        .filter(|attempt| !attempt.outline_steps.is_empty())
        .or_else(|| attempts.iter().find(|attempt| !attempt.outline_steps.is_empty()))
        .map(|attempt| attempt.outline_steps.clone())
        .unwrap_or_default()
}

/// Concatenate resolved plan steps into one attempt.
fn synthesize_steps(batch: &[ContextItem], steps: Vec<String>) -> SolutionAttempt {
    let sections: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let body = match (&item.result, item.solution()) {
                (_, Some(attempt)) => attempt.final_answer.trim().to_string(),
                (ContextResult::Failed { reason }, None) => {
                    format!("_This step could not be resolved: {reason}_")
                }
                (ContextResult::Output(output), None) => output.raw_text.trim().to_string(),
            };
            format!("### Step {}: {}\n\n{}", index + 1, item.task.problem.trim(), body)
        })
        .collect();
    SolutionAttempt {
        final_answer: sections.join("\n\n"),
        outline_steps: steps,
        ..SolutionAttempt::default()
    }
}

fn step_context(steps: &[String], index: usize) -> String {
    let plan: Vec<String> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect();
    format!(
        "Step {} of {} of this plan:\n{}",
        index + 1,
        steps.len(),
        plan.join("\n")
    )
}

/// Run one worker activation.
pub fn run(config: &WorkerConfig, input: &AgentInput<'_>) -> Result<AgentOutput> {
    let ledger = Ledger::replay(input.local_context)?;
    let worker = Worker {
        config,
        input,
        problem: if input.task.problem.trim().is_empty() {
            input.problem
        } else {
            input.task.problem.as_str()
        },
    };
    debug!(
        node = input.node_id,
        rounds = ledger.rounds,
        max_rounds = config.max_verify_rounds,
        "worker resumed"
    );

    let rounds_left = ledger.rounds < config.max_verify_rounds;
    match ledger.next.clone() {
        Next::Start => Ok(worker.spawn_provers(&ledger)),
        Next::RoundAborted if rounds_left => Ok(worker.spawn_provers(&ledger)),
        Next::Verify(attempts) => Ok(worker.spawn_verifier(&ledger, attempts)),
        Next::Accepted(attempt) => Ok(worker.accept(attempt)),
        Next::Rejected { plan } if rounds_left => {
            if worker.can_decompose(&ledger) && !plan.is_empty() {
                Ok(worker.spawn_steps(&ledger, plan))
            } else {
                Ok(worker.spawn_provers(&ledger))
            }
        }
        Next::RoundAborted | Next::Rejected { .. } => Ok(worker.give_up(ledger)),
    }
}

struct Worker<'a, 'b> {
    config: &'a WorkerConfig,
    input: &'a AgentInput<'b>,
    problem: &'a str,
}

impl Worker<'_, '_> {
    fn agent_type(&self) -> AgentType {
        self.input.agent_type
    }

    fn can_decompose(&self, ledger: &Ledger) -> bool {
        self.config.allow_decomposition
            && matches!(self.input.task.goal, Goal::Solve | Goal::DecomposeStep)
            && ledger.mode == WorkerMode::Direct
    }

    fn status(&self, ledger: &Ledger, phase: WorkerPhase, notes: &str) -> WorkerStatus {
        WorkerStatus {
            phase,
            mode: ledger.mode.clone(),
            round_index: ledger.rounds,
            provers_spawned: 0,
            verifier_spawned: false,
            decomposition_triggered: false,
            feedback: ledger.feedback.clone(),
            notes: Some(notes.to_string()),
        }
    }

    fn spawn_provers(&self, ledger: &Ledger) -> AgentOutput {
        let task = Task {
            step: self.input.task.step.clone(),
            parent_problem: self.input.task.parent_problem.clone(),
            ..Task::new(self.problem, self.input.task.goal)
        }
        .with_feedback(ledger.feedback.clone());
        let spawns: Vec<SpawnRequest> = (0..self.config.num_provers)
            .map(|_| SpawnRequest::new(AgentType::Prover, task.clone()))
            .collect();
        let notes = if ledger.rounds == 0 {
            "spawning provers"
        } else {
            "starting next prover round"
        };
        let status = WorkerStatus {
            provers_spawned: spawns.len(),
            ..self.status(ledger, WorkerPhase::ProverGeneration, notes)
        };
        AgentOutput::spawning(
            self.agent_type(),
            notes,
            Some(Normalized::WorkerStatus(status)),
            spawns,
        )
    }

    fn spawn_verifier(&self, ledger: &Ledger, attempts: Vec<SolutionAttempt>) -> AgentOutput {
        let count = attempts.len();
        let task = Task {
            attempts,
            ..Task::new(self.problem, Goal::Verify)
        };
        let status = WorkerStatus {
            provers_spawned: count,
            verifier_spawned: true,
            ..self.status(ledger, WorkerPhase::Verification, "spawning verifier")
        };
        AgentOutput::spawning(
            self.agent_type(),
            "spawning verifier",
            Some(Normalized::WorkerStatus(status)),
            vec![SpawnRequest::new(AgentType::Verifier, task)],
        )
    }

    fn spawn_steps(&self, ledger: &Ledger, plan: Vec<String>) -> AgentOutput {
        let steps: Vec<String> = plan.into_iter().take(self.config.max_plan_steps).collect();
        let spawns: Vec<SpawnRequest> = steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let task = Task {
                    step: Some(step_context(&steps, index)),
                    parent_problem: Some(self.problem.to_string()),
                    ..Task::new(step.as_str(), Goal::DecomposeStep)
                };
                SpawnRequest::new(AgentType::SubWorker, task)
            })
            .collect();
        info!(node = self.input.node_id, steps = steps.len(), "decomposing into plan steps");
        let status = WorkerStatus {
            mode: WorkerMode::Decomposing {
                steps: steps.clone(),
            },
            decomposition_triggered: true,
            ..self.status(ledger, WorkerPhase::Decomposition, "spawning decomposition steps")
        };
        AgentOutput::spawning(
            self.agent_type(),
            "spawning decomposition steps",
            Some(Normalized::WorkerStatus(status)),
            spawns,
        )
    }

    fn accept(&self, mut attempt: SolutionAttempt) -> AgentOutput {
        let entries = if attempt.kb_updates.is_empty() {
            vec![make_kb_entry(
                self.input.node_id,
                AUTO_KB_TITLE,
                &attempt.final_answer,
            )]
        } else {
            attempt.kb_updates.clone()
        };
        let entries = prepare_kb_entries(entries);
        attempt.kb_updates = entries.clone();
        attempt.accepted = true;
        info!(node = self.input.node_id, "attempt accepted");
        AgentOutput::finished(
            self.agent_type(),
            attempt.final_answer.clone(),
            Some(Normalized::Solution(attempt)),
        )
        .with_kb_writes(entries)
    }

    fn give_up(&self, ledger: Ledger) -> AgentOutput {
        warn!(
            node = self.input.node_id,
            rounds = ledger.rounds,
            has_attempt = ledger.best.is_some(),
            "verify rounds exhausted"
        );
        let attempt = match ledger.best {
            Some(Scored { attempt, votes }) => SolutionAttempt {
                final_answer: format!(
                    "**Unverified.** The verifiers did not confirm this solution (best score {votes}).\n\n{}",
                    attempt.final_answer.trim()
                ),
                accepted: false,
                ..attempt
            },
            None => SolutionAttempt::from_text(format!(
                "Verifier could not confirm a solution for: {}",
                self.problem
            )),
        };
        AgentOutput::finished(
            self.agent_type(),
            attempt.final_answer.clone(),
            Some(Normalized::Solution(attempt)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{KbKind, VerificationReport};
    use crate::scheduler::{RunOutcome, create_run};
    use crate::test_support::{
        InputFixture, attempt_item, failed_item, output_item, stub_agent,
    };
    use anyhow::anyhow;

    fn config(num_provers: usize, max_verify_rounds: u32) -> WorkerConfig {
        WorkerConfig {
            num_provers,
            max_verify_rounds,
            ..WorkerConfig::default()
        }
    }

    fn solve_fixture(items: Vec<ContextItem>) -> InputFixture {
        InputFixture::new(AgentType::Worker, Task::new("Prove P.", Goal::Solve)).with_context(items)
    }

    fn report_item(from: u32, batch: u32, scores: Vec<u32>, attempts: Vec<SolutionAttempt>, ensemble: u32) -> ContextItem {
        let decision = crate::core::acceptance::decide(&scores, ensemble);
        let report = VerificationReport {
            accepted: decision.accepted,
            best_attempt_index: decision.best,
            attempt_critiques: vec!["needs work".to_string(); scores.len()],
            attempt_scores: scores,
            global_feedback: "Attempt 0: needs work".to_string(),
            attempts: attempts.clone(),
        };
        let task = Task {
            attempts,
            ..Task::new("Prove P.", Goal::Verify)
        };
        output_item(
            from,
            batch,
            task,
            AgentOutput::finished(AgentType::Verifier, "", Some(Normalized::Verification(report))),
        )
    }

    fn plan(steps: &[&str]) -> SolutionAttempt {
        SolutionAttempt {
            outline_steps: steps.iter().map(|s| s.to_string()).collect(),
            ..SolutionAttempt::from_text("Plan:\n- a\n- b")
        }
    }

    fn status(output: &AgentOutput) -> &WorkerStatus {
        match &output.normalized {
            Some(Normalized::WorkerStatus(status)) => status,
            other => panic!("expected worker status, got {other:?}"),
        }
    }

    #[test]
    fn first_activation_spawns_provers() {
        let fixture = solve_fixture(Vec::new());
        let output = run(&config(2, 1), &fixture.input()).expect("worker");
        assert_eq!(output.spawn_requests.len(), 2);
        for request in &output.spawn_requests {
            assert_eq!(request.agent_type, AgentType::Prover);
            assert_eq!(request.task.problem, "Prove P.");
            assert_eq!(request.task.goal, Goal::Solve);
            assert_eq!(request.task.feedback, None);
        }
        let status = status(&output);
        assert_eq!(status.phase, WorkerPhase::ProverGeneration);
        assert_eq!(status.provers_spawned, 2);
    }

    /// Verifies a failed prover is dropped and the rest go to one verifier.
    #[test]
    fn surviving_attempts_go_to_the_verifier() {
        let fixture = solve_fixture(vec![
            failed_item(3, 1, AgentType::Prover, Task::default(), "timeout"),
            attempt_item(4, 1, SolutionAttempt::from_text("second")),
        ]);
        let output = run(&config(2, 1), &fixture.input()).expect("worker");
        assert_eq!(output.spawn_requests.len(), 1);
        let request = &output.spawn_requests[0];
        assert_eq!(request.agent_type, AgentType::Verifier);
        assert_eq!(request.task.goal, Goal::Verify);
        assert_eq!(request.task.attempts, vec![SolutionAttempt::from_text("second")]);
        assert!(status(&output).verifier_spawned);
    }

    #[test]
    fn accepted_attempt_finishes_with_kb_writes() {
        let attempts = vec![SolutionAttempt::from_text("no"), SolutionAttempt::from_text("Thus P holds.")];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, attempts[0].clone()),
            attempt_item(4, 1, attempts[1].clone()),
            report_item(5, 2, vec![0, 1], attempts, 1),
        ]);
        let output = run(&config(2, 1), &fixture.input()).expect("worker");
        assert!(output.spawn_requests.is_empty());
        let attempt = output.solution().expect("solution");
        assert!(attempt.accepted);
        assert_eq!(attempt.final_answer, "Thus P holds.");
        assert_eq!(output.kb_writes.len(), 1);
        assert_eq!(output.kb_writes[0].id, "Result 2");
        assert_eq!(output.kb_writes[0].kind, KbKind::Result);
        assert_eq!(attempt.kb_updates, output.kb_writes);
    }

    /// Verifies a rejection with rounds left retries with the verifier's feedback.
    #[test]
    fn rejection_retries_with_feedback() {
        let attempts = vec![SolutionAttempt::from_text("weak")];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, attempts[0].clone()),
            report_item(4, 2, vec![0], attempts, 1),
        ]);
        let output = run(&config(1, 2), &fixture.input()).expect("worker");
        assert_eq!(output.spawn_requests.len(), 1);
        let request = &output.spawn_requests[0];
        assert_eq!(request.agent_type, AgentType::Prover);
        assert_eq!(request.task.feedback.as_deref(), Some("Attempt 0: needs work"));
        assert_eq!(status(&output).round_index, 1);
    }

    #[test]
    fn rejected_plan_triggers_decomposition() {
        let attempts = vec![SolutionAttempt::from_text("direct"), plan(&["a", "b", "c"])];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, attempts[0].clone()),
            attempt_item(4, 1, attempts[1].clone()),
            report_item(5, 2, vec![0, 0], attempts, 1),
        ]);
        let cfg = WorkerConfig {
            max_plan_steps: 2,
            ..config(2, 2)
        };
        let output = run(&cfg, &fixture.input()).expect("worker");

        let steps: Vec<&str> = output
            .spawn_requests
            .iter()
            .map(|request| request.task.problem.as_str())
            .collect();
        assert_eq!(steps, vec!["a", "b"]);
        let first = &output.spawn_requests[0];
        assert_eq!(first.agent_type, AgentType::SubWorker);
        assert_eq!(first.task.goal, Goal::DecomposeStep);
        assert_eq!(first.task.parent_problem.as_deref(), Some("Prove P."));
        assert!(first.task.step.as_deref().expect("step").starts_with("Step 1 of 2"));
        let status = status(&output);
        assert_eq!(status.phase, WorkerPhase::Decomposition);
        assert!(status.decomposition_triggered);
    }

    /// Verifies the synthesized attempt replaces fresh provers in the next verify round.
    #[test]
    fn resolved_steps_are_verified_as_one_attempt() {
        let attempts = vec![plan(&["a", "b"])];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, attempts[0].clone()),
            report_item(4, 2, vec![0], attempts, 1),
            output_item(
                5,
                3,
                Task::new("a", Goal::DecomposeStep),
                AgentOutput::finished(
                    AgentType::SubWorker,
                    "A done",
                    Some(Normalized::Solution(SolutionAttempt::from_text("A done"))),
                ),
            ),
            failed_item(6, 3, AgentType::SubWorker, Task::new("b", Goal::DecomposeStep), "budget"),
        ]);
        let output = run(&config(1, 2), &fixture.input()).expect("worker");
        let request = &output.spawn_requests[0];
        assert_eq!(request.agent_type, AgentType::Verifier);
        assert_eq!(request.task.attempts.len(), 1);
        let synthesized = &request.task.attempts[0];
        assert_eq!(
            synthesized.final_answer,
            "### Step 1: a\n\nA done\n\n### Step 2: b\n\n_This step could not be resolved: budget_"
        );
        assert!(matches!(status(&output).mode, WorkerMode::Decomposing { .. }));
    }

    #[test]
    fn decomposition_happens_at_most_once() {
        let plan_attempt = plan(&["a"]);
        let synthesized = SolutionAttempt::from_text("### Step 1: a\n\nA");
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, plan_attempt.clone()),
            report_item(4, 2, vec![0], vec![plan_attempt], 1),
            output_item(
                5,
                3,
                Task::new("a", Goal::DecomposeStep),
                AgentOutput::finished(AgentType::SubWorker, "A", Some(Normalized::Solution(SolutionAttempt::from_text("A")))),
            ),
            report_item(6, 4, vec![0], vec![synthesized], 1),
        ]);
        let output = run(&config(2, 3), &fixture.input()).expect("worker");
        assert_eq!(output.spawn_requests.len(), 2);
        assert!(output
            .spawn_requests
            .iter()
            .all(|request| request.agent_type == AgentType::Prover));
    }

    #[test]
    fn exploration_workers_never_decompose() {
        let attempts = vec![plan(&["a", "b"])];
        let fixture = InputFixture::new(AgentType::Worker, Task::new("Q?", Goal::Explore)).with_context(vec![
            attempt_item(3, 1, attempts[0].clone()),
            report_item(4, 2, vec![0], attempts, 1),
        ]);
        let output = run(&config(1, 2), &fixture.input()).expect("worker");
        assert_eq!(output.spawn_requests[0].agent_type, AgentType::Prover);
    }

    /// Verifies provers inherit the goal of the worker that spawns them.
    #[test]
    fn provers_carry_the_worker_goal() {
        for goal in [Goal::Explore, Goal::DecomposeStep] {
            let fixture = InputFixture::new(AgentType::SubWorker, Task::new("Show a.", goal));
            let output = run(&config(2, 1), &fixture.input()).expect("worker");
            assert_eq!(output.spawn_requests.len(), 2);
            for request in &output.spawn_requests {
                assert_eq!(request.agent_type, AgentType::Prover);
                assert_eq!(request.task.goal, goal);
            }
        }
    }

    /// Verifies exhaustion reports the highest-scoring attempt across rounds as unverified.
    #[test]
    fn exhaustion_returns_best_attempt_unverified() {
        let first = vec![SolutionAttempt::from_text("round one")];
        let second = vec![SolutionAttempt::from_text("round two")];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, first[0].clone()),
            report_item(4, 2, vec![1], first, 3),
            attempt_item(5, 3, second[0].clone()),
            report_item(6, 4, vec![1], second, 3),
        ]);
        let output = run(&config(1, 2), &fixture.input()).expect("worker");
        let attempt = output.solution().expect("solution");
        assert!(!attempt.accepted);
        assert!(attempt.final_answer.starts_with("**Unverified.**"));
        assert!(attempt.final_answer.ends_with("round one"));
        assert!(output.kb_writes.is_empty());
    }

    #[test]
    fn failed_verifier_counts_as_rejected_round() {
        let attempts = vec![SolutionAttempt::from_text("only")];
        let fixture = solve_fixture(vec![
            attempt_item(3, 1, attempts[0].clone()),
            failed_item(
                4,
                2,
                AgentType::Verifier,
                Task {
                    attempts,
                    ..Task::new("Prove P.", Goal::Verify)
                },
                "model down",
            ),
        ]);
        let output = run(&config(1, 1), &fixture.input()).expect("worker");
        let attempt = output.solution().expect("solution");
        assert!(!attempt.accepted);
        assert!(attempt.final_answer.ends_with("only"));
    }

    #[test]
    fn unexpected_children_are_an_error() {
        let fixture = solve_fixture(vec![output_item(
            3,
            1,
            Task::default(),
            AgentOutput::finished(AgentType::Exploration, "", None),
        )]);
        assert!(run(&config(1, 1), &fixture.input()).is_err());
    }

    /// Verifies K=2, N=2 with every prover failing ends unverified without crashing.
    #[test]
    fn all_provers_failing_exhausts_rounds() {
        let cfg = config(2, 2);
        let agent = stub_agent(|input| match input.agent_type {
            AgentType::Orchestrator if input.local_context.is_empty() => Ok(AgentOutput::spawning(
                AgentType::Orchestrator,
                "",
                None,
                vec![SpawnRequest::new(AgentType::Worker, Task::new("Prove P.", Goal::Solve))],
            )),
            AgentType::Orchestrator => Ok(input.local_context[0]
                .output()
                .cloned()
                .expect("worker output")),
            AgentType::Worker => run(&cfg, input),
            _ => Err(anyhow!("prover crashed")),
        });

        let mut graph_run = create_run("Prove P.");
        let outcome = graph_run.run_to_completion(&agent, 50).expect("run");
        let RunOutcome::Succeeded(output) = outcome else {
            panic!("run failed");
        };
        let attempt = output.solution().expect("solution");
        assert!(!attempt.accepted);
        assert_eq!(attempt.final_answer, "Verifier could not confirm a solution for: Prove P.");
        // root, worker, 2 provers, worker, 2 provers, worker, root
        assert_eq!(graph_run.steps(), 9);
    }
}
