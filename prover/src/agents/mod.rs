//! Agent implementations behind the scheduler's agent contract.
//!
//! An agent is a function of one node activation: it reads the node's
//! problem, task, routed child results and KB snapshot, and returns raw text,
//! a normalized output, KB writes and spawn requests. Agents never touch the
//! graph or the knowledge base directly; the scheduler applies what they return.
//!
//! The orchestrator and worker are pure control logic over `local_context`.
//! Exploration, prover, verifier and parser agents call the completion service.

use anyhow::Result;

use crate::core::types::{AgentInput, AgentOutput, AgentType};
use crate::io::completion::CompletionService;
use crate::io::config::RunConfig;
use crate::io::prompt::PromptEngine;

pub mod exploration;
pub mod orchestrator;
pub mod parser;
pub mod prover;
pub mod tools;
pub mod verifier;
pub mod worker;

/// Logic invoked once per node activation.
pub trait Agent {
    fn run(&self, input: &AgentInput<'_>) -> Result<AgentOutput>;
}

impl<F> Agent for F
where
    F: Fn(&AgentInput<'_>) -> Result<AgentOutput>,
{
    fn run(&self, input: &AgentInput<'_>) -> Result<AgentOutput> {
        self(input)
    }
}

/// Shared collaborators for the LLM-backed agents.
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    pub config: &'a RunConfig,
    pub completion: &'a dyn CompletionService,
    pub prompts: &'a PromptEngine,
}

/// Dispatches each activation to the agent for the node's type.
pub struct AgentSet<'a> {
    ctx: AgentContext<'a>,
}

impl<'a> AgentSet<'a> {
    pub fn new(ctx: AgentContext<'a>) -> Self {
        Self { ctx }
    }
}

impl Agent for AgentSet<'_> {
    fn run(&self, input: &AgentInput<'_>) -> Result<AgentOutput> {
        match input.agent_type {
            AgentType::Orchestrator => orchestrator::run(&self.ctx.config.orchestrator, input),
            AgentType::Exploration => exploration::run(&self.ctx, input),
            AgentType::Worker | AgentType::SubWorker => worker::run(&self.ctx.config.worker, input),
            AgentType::Prover => prover::run(&self.ctx, input),
            AgentType::Verifier => verifier::run(&self.ctx, input),
            AgentType::Parser => parser::run(&self.ctx, input),
        }
    }
}
