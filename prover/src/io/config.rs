//! Run configuration: named presets plus TOML overrides.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the fields
//! it changes. Missing sections fall back to the `default` preset.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::limits::DEFAULT_MAX_TOTAL_STEPS;

const EXPLORATION_SYSTEM_PROMPT: &str = include_str!("prompts/system/exploration.md");
const PROVER_SYSTEM_PROMPT: &str = include_str!("prompts/system/prover.md");
const VERIFIER_SYSTEM_PROMPT: &str = include_str!("prompts/system/verifier.md");
const PARSER_SYSTEM_PROMPT: &str = include_str!("prompts/system/parser.md");
const KB_SUMMARIZER_SYSTEM_PROMPT: &str = include_str!("prompts/system/kb_summarizer.md");

/// Sampling parameters forwarded to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-5.2".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: None,
        }
    }
}

impl LlmConfig {
    pub fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Exploration children run before the solve worker.
    pub exploration_rounds: u32,
    /// Global cap on node activations for the run.
    pub max_total_steps: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exploration_rounds: 0,
            max_total_steps: DEFAULT_MAX_TOTAL_STEPS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplorationConfig {
    pub max_questions: usize,
    pub llm: LlmConfig,
    /// Rendered with `max_questions` in scope.
    pub system_prompt: String,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_questions: 3,
            llm: LlmConfig::new("openai/gpt-5.2-pro", 0.7),
            system_prompt: EXPLORATION_SYSTEM_PROMPT.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Provers spawned per round (N).
    pub num_provers: usize,
    /// Verify rounds before giving up (K).
    pub max_verify_rounds: u32,
    pub allow_decomposition: bool,
    pub max_plan_steps: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_provers: 1,
            max_verify_rounds: 1,
            allow_decomposition: true,
            max_plan_steps: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProverConfig {
    pub llm: LlmConfig,
    pub system_prompt: String,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::new("openai/gpt-5.2", 0.4),
            system_prompt: PROVER_SYSTEM_PROMPT.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifierConfig {
    pub ensemble_size: u32,
    /// One entry per ensemble member; the first `ensemble_size` are used.
    pub llms: Vec<LlmConfig>,
    pub system_prompt: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 1,
            llms: vec![LlmConfig::new("google/gemini-3-pro-preview", 0.2)],
            system_prompt: VERIFIER_SYSTEM_PROMPT.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    /// Without an LLM, parsing goes straight to the deterministic fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: PARSER_SYSTEM_PROMPT.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KbSummarizerConfig {
    /// Without an LLM, draft KB entries are kept as written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for KbSummarizerConfig {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: KB_SUMMARIZER_SYSTEM_PROMPT.trim().to_string(),
        }
    }
}

/// External command that serves completions over stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Program and arguments (e.g. `["llm-bridge", "--json"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate completion stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm-complete".to_string()],
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum bytes for a user prompt before droppable sections are removed.
    pub budget_bytes: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 60_000,
        }
    }
}

/// Top-level run configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub name: String,
    pub orchestrator: OrchestratorConfig,
    pub exploration: ExplorationConfig,
    pub worker: WorkerConfig,
    pub prover: ProverConfig,
    pub verifier: VerifierConfig,
    pub parser: ParserConfig,
    pub kb_summarizer: KbSummarizerConfig,
    pub completion: CompletionConfig,
    pub prompt: PromptConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            orchestrator: OrchestratorConfig {
                exploration_rounds: 2,
                max_total_steps: 128,
            },
            exploration: ExplorationConfig {
                max_questions: 2,
                ..ExplorationConfig::default()
            },
            worker: WorkerConfig {
                num_provers: 2,
                max_verify_rounds: 1,
                ..WorkerConfig::default()
            },
            prover: ProverConfig::default(),
            verifier: VerifierConfig::default(),
            parser: ParserConfig {
                llm: Some(LlmConfig::new("openai/gpt-5-mini", 0.0)),
                ..ParserConfig::default()
            },
            kb_summarizer: KbSummarizerConfig {
                llm: Some(LlmConfig::new("openai/gpt-5-mini", 0.0)),
                ..KbSummarizerConfig::default()
            },
            completion: CompletionConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl RunConfig {
    /// Single-prover preset without exploration, allowing one retry round.
    pub fn quick() -> Self {
        let base = Self::default();
        Self {
            name: "quick".to_string(),
            orchestrator: OrchestratorConfig {
                exploration_rounds: 0,
                max_total_steps: 64,
            },
            worker: WorkerConfig {
                num_provers: 1,
                max_verify_rounds: 2,
                ..base.worker
            },
            kb_summarizer: KbSummarizerConfig {
                llm: None,
                ..base.kb_summarizer
            },
            ..base
        }
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!("invalid config '{}': {}", self.name, errors.join("; ")))
    }

    fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.orchestrator.max_total_steps == 0 {
            errors.push("orchestrator.max_total_steps must be > 0".to_string());
        }
        if self.worker.num_provers == 0 {
            errors.push("worker.num_provers must be > 0".to_string());
        }
        if self.worker.max_verify_rounds == 0 {
            errors.push("worker.max_verify_rounds must be > 0".to_string());
        }
        if self.worker.max_plan_steps == 0 {
            errors.push("worker.max_plan_steps must be > 0".to_string());
        }
        if self.verifier.ensemble_size == 0 {
            errors.push("verifier.ensemble_size must be > 0".to_string());
        }
        if self.verifier.llms.len() < self.verifier.ensemble_size as usize {
            errors.push(format!(
                "verifier.llms has {} entries but ensemble_size is {}",
                self.verifier.llms.len(),
                self.verifier.ensemble_size
            ));
        }
        if self.completion.command.is_empty() || self.completion.command[0].trim().is_empty() {
            errors.push("completion.command must be a non-empty array".to_string());
        }
        if self.completion.timeout_secs == 0 {
            errors.push("completion.timeout_secs must be > 0".to_string());
        }
        if self.completion.output_limit_bytes == 0 {
            errors.push("completion.output_limit_bytes must be > 0".to_string());
        }
        errors
    }
}

const PRESETS: &[(&str, fn() -> RunConfig)] = &[("default", RunConfig::default), ("quick", RunConfig::quick)];

/// Names of the built-in presets, sorted.
pub fn list_presets() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PRESETS.iter().map(|(name, _)| *name).collect();
    names.sort_unstable();
    names
}

pub fn preset(name: &str) -> Result<RunConfig> {
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, build)| build())
        .ok_or_else(|| {
            anyhow!(
                "config '{name}' not found. Available: {}",
                list_presets().join(", ")
            )
        })
}

#[derive(Deserialize)]
struct NameProbe {
    name: Option<String>,
}

/// Load a TOML config. Sections the file omits come from the `default` preset;
/// an unnamed file is named after its file stem.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let probe: NameProbe =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if probe.name.is_none_or(|name| name.trim().is_empty()) {
        cfg.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "custom".to_string());
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Resolve `--config`: an existing path is loaded as TOML, anything else is a preset name.
pub fn resolve_config(name_or_path: &str) -> Result<RunConfig> {
    let path = Path::new(name_or_path);
    if path.is_file() {
        return load_config(path);
    }
    if name_or_path.ends_with(".toml") {
        bail!("config file {} does not exist", path.display());
    }
    let cfg = preset(name_or_path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename over it.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid_and_sorted() {
        assert_eq!(list_presets(), vec!["default", "quick"]);
        for name in list_presets() {
            let cfg = preset(name).expect("preset");
            assert_eq!(cfg.name, name);
            cfg.validate().expect("valid preset");
        }
    }

    #[test]
    fn default_preset_matches_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.orchestrator.exploration_rounds, 2);
        assert_eq!(cfg.orchestrator.max_total_steps, 128);
        assert_eq!(cfg.exploration.max_questions, 2);
        assert_eq!(cfg.worker.num_provers, 2);
        assert_eq!(cfg.worker.max_verify_rounds, 1);
        assert!(cfg.worker.allow_decomposition);
        assert_eq!(cfg.worker.max_plan_steps, 8);
    }

    #[test]
    fn unknown_preset_lists_available_names() {
        let err = resolve_config("turbo").expect_err("unknown preset");
        assert_eq!(
            err.to_string(),
            "config 'turbo' not found. Available: default, quick"
        );
    }

    /// Verifies a partial TOML file overrides only the fields it names.
    #[test]
    fn partial_toml_overrides_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tight.toml");
        fs::write(
            &path,
            "[worker]\nnum_provers = 3\n\n[verifier]\nensemble_size = 1\n\n[completion]\ncommand = [\"./mock\"]\n",
        )
        .expect("write toml");

        let cfg = resolve_config(path.to_str().expect("utf8 path")).expect("load");
        assert_eq!(cfg.name, "tight");
        assert_eq!(cfg.worker.num_provers, 3);
        assert_eq!(cfg.worker.max_verify_rounds, 1);
        assert_eq!(cfg.completion.command, vec!["./mock".to_string()]);
        assert_eq!(cfg.completion.timeout_secs, 600);
    }

    #[test]
    fn validate_collects_every_error() {
        let mut cfg = RunConfig::default();
        cfg.worker.num_provers = 0;
        cfg.verifier.ensemble_size = 3;
        cfg.completion.command.clear();
        let err = cfg.validate().expect_err("invalid");
        let message = err.to_string();
        assert!(message.contains("worker.num_provers must be > 0"));
        assert!(message.contains("verifier.llms has 1 entries but ensemble_size is 3"));
        assert!(message.contains("completion.command must be a non-empty array"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RunConfig::quick();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("config.toml.tmp").exists());
    }

    #[test]
    fn missing_toml_path_is_an_error() {
        let err = resolve_config("/nonexistent/run.toml").expect_err("missing");
        assert!(err.to_string().contains("does not exist"));
    }
}
