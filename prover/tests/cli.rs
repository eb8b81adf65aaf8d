//! CLI tests for `prover run` and `prover list-configs`.
//!
//! Spawns the prover binary and verifies exit codes, the written report and
//! the trace file.

use std::fs;
use std::process::Command;

use prover::exit_codes;
use prover::test_support::ProblemFixture;

/// Completion command that ignores the request and always approves.
#[cfg(unix)]
const APPROVING_CONFIG: &str = r#"
name = "scripted"

[orchestrator]
exploration_rounds = 0

[completion]
command = ["sh", "-c", "cat > /dev/null; printf 'Verdict: Correct\\nReason: ok'"]
timeout_secs = 30
"#;

#[test]
fn list_configs_prints_presets() {
    let output = Command::new(env!("CARGO_BIN_EXE_prover"))
        .arg("list-configs")
        .output()
        .expect("prover list-configs");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "default\nquick\n");
}

#[test]
fn unknown_config_exits_invalid() {
    let fixture = ProblemFixture::new("Prove 1 + 1 = 2.").expect("fixture");
    let output = Command::new(env!("CARGO_BIN_EXE_prover"))
        .args(["run", "--config", "nope", "--input"])
        .arg(fixture.input())
        .arg("--output")
        .arg(fixture.output())
        .output()
        .expect("prover run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Available: default, quick"), "stderr: {stderr}");
    assert!(!fixture.output().exists());
}

#[test]
fn missing_problem_file_exits_invalid() {
    let fixture = ProblemFixture::new("unused").expect("fixture");
    let status = Command::new(env!("CARGO_BIN_EXE_prover"))
        .args(["run", "--config", "quick", "--input"])
        .arg(fixture.root().join("absent.md"))
        .arg("--output")
        .arg(fixture.output())
        .status()
        .expect("prover run");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
#[test]
fn run_writes_report_and_trace() {
    let fixture = ProblemFixture::new("Prove 1 + 1 = 2.").expect("fixture");
    let config = fixture
        .write_config("scripted.toml", APPROVING_CONFIG)
        .expect("config");
    let status = Command::new(env!("CARGO_BIN_EXE_prover"))
        .args(["run", "--config"])
        .arg(&config)
        .arg("--input")
        .arg(fixture.input())
        .arg("--output")
        .arg(fixture.output())
        .arg("--trace")
        .arg(fixture.trace())
        .status()
        .expect("prover run");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let report = fixture.read_output().expect("report");
    assert!(report.starts_with("# Problem\n\nProve 1 + 1 = 2.\n\n# Solution\n\n"));
    assert!(report.contains("# KB Appendix"));
    assert!(!report.contains("Run failed"));

    let trace = fs::read_to_string(fixture.trace()).expect("trace");
    let lines: Vec<&str> = trace.lines().collect();
    assert!(lines[0].contains(r#""event":"run_start""#));
    assert!(lines[0].contains(r#""config":"scripted""#));
    assert!(lines[lines.len() - 1].contains(r#""event":"run_end""#));
    assert!(lines.iter().all(|line| line.contains(r#""ts":""#)));
}

/// Verifies an exhausted step budget exits with the failed-run code and still writes a report.
#[cfg(unix)]
#[test]
fn exhausted_budget_exits_run_failed() {
    let fixture = ProblemFixture::new("Prove 1 + 1 = 2.").expect("fixture");
    let config = fixture
        .write_config("scripted.toml", APPROVING_CONFIG)
        .expect("config");
    let status = Command::new(env!("CARGO_BIN_EXE_prover"))
        .args(["run", "--config"])
        .arg(&config)
        .arg("--input")
        .arg(fixture.input())
        .arg("--output")
        .arg(fixture.output())
        .args(["--max-steps", "2"])
        .status()
        .expect("prover run");

    assert_eq!(status.code(), Some(exit_codes::RUN_FAILED));
    let report = fixture.read_output().expect("report");
    assert!(report.contains("**Run failed:** step budget of 2 activations exceeded"));
}

#[test]
fn zero_max_steps_exits_invalid() {
    let fixture = ProblemFixture::new("Prove 1 + 1 = 2.").expect("fixture");
    let output = Command::new(env!("CARGO_BIN_EXE_prover"))
        .args(["run", "--config", "quick", "--input"])
        .arg(fixture.input())
        .arg("--output")
        .arg(fixture.output())
        .args(["--max-steps", "0"])
        .output()
        .expect("prover run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("step budget must be at least 1"), "stderr: {stderr}");
    assert!(!fixture.output().exists());
}
