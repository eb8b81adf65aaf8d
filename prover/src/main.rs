//! Multi-agent prover CLI.
//!
//! Runs one problem through the orchestration runtime and writes a Markdown
//! report. Model calls go through the command configured in
//! `[completion]`, which receives each request as JSON on stdin.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use prover::exit_codes;
use prover::io::completion::CommandCompletion;
use prover::io::config::{list_presets, resolve_config};
use prover::io::report::write_report;
use prover::io::trace::{JsonlTrace, NullTrace, TraceSink};
use prover::logging;
use prover::scheduler::RunOutcome;
use prover::solve::run_problem;

#[derive(Parser)]
#[command(name = "prover", version, about = "Multi-agent math prover")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve the problem in `--input` and write the report to `--output`.
    Run {
        /// Preset name or path to a TOML config.
        #[arg(long)]
        config: String,
        /// Markdown file holding the problem statement.
        #[arg(long)]
        input: PathBuf,
        /// Markdown report path.
        #[arg(long)]
        output: PathBuf,
        /// Optional JSONL trace path.
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Override `orchestrator.max_total_steps` for this run.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Print the built-in config presets.
    ListConfigs,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            input,
            output,
            trace,
            max_steps,
        } => cmd_run(&config, &input, &output, trace.as_deref(), max_steps),
        Command::ListConfigs => {
            for name in list_presets() {
                println!("{name}");
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(
    config: &str,
    input: &Path,
    output: &Path,
    trace: Option<&Path>,
    max_steps: Option<u32>,
) -> Result<i32> {
    let config = resolve_config(config)?;
    let problem = fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?;
    let problem = problem.trim();
    if problem.is_empty() {
        bail!("problem file {} is empty", input.display());
    }
    let trace: Box<dyn TraceSink> = match trace {
        Some(path) => Box::new(JsonlTrace::create(path)?),
        None => Box::new(NullTrace),
    };
    let completion = CommandCompletion::new(&config.completion);

    let solved = run_problem(&config, &completion, problem, trace, max_steps)?;
    write_report(output, &solved.report)?;
    info!(output = %output.display(), steps = solved.steps, "report written");

    match &solved.outcome {
        RunOutcome::Succeeded(_) => Ok(exit_codes::OK),
        RunOutcome::Failed(reason) => {
            eprintln!("run failed: {reason}");
            Ok(exit_codes::RUN_FAILED)
        }
    }
}
