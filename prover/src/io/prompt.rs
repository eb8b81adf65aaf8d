//! Prompt rendering for the LLM-backed agents.
//!
//! User prompts are minijinja templates split into marked sections. When a
//! rendered prompt exceeds the configured byte budget, droppable sections are
//! removed in a fixed order before the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const PROVER_TEMPLATE: &str = include_str!("prompts/prover.md");
const VERIFIER_TEMPLATE: &str = include_str!("prompts/verifier.md");
const EXPLORATION_TEMPLATE: &str = include_str!("prompts/exploration.md");
const PARSER_TEMPLATE: &str = include_str!("prompts/parser.md");
const KB_SUMMARY_TEMPLATE: &str = include_str!("prompts/kb_summary.md");

/// Sections removed first when over budget. Unlisted sections are never dropped.
const DROP_ORDER: [&str; 5] = ["hierarchy", "context", "source", "kb", "feedback"];

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct ProverPrompt<'a> {
    pub problem: &'a str,
    pub step: Option<&'a str>,
    pub parent_problem: Option<&'a str>,
    pub feedback: Option<&'a str>,
    pub hierarchy: &'a str,
    pub local_context: &'a str,
    pub kb: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifierPrompt<'a> {
    pub problem: &'a str,
    pub attempt: &'a str,
    pub hierarchy: &'a str,
    pub kb: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplorationPrompt<'a> {
    pub problem: &'a str,
    pub hierarchy: &'a str,
    pub kb: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParserPrompt<'a> {
    pub target: &'a str,
    pub schema: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbSummaryPrompt<'a> {
    pub problem: &'a str,
    pub id: &'a str,
    pub kind: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub source: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("prover", PROVER_TEMPLATE),
            ("verifier", VERIFIER_TEMPLATE),
            ("exploration", EXPLORATION_TEMPLATE),
            ("parser", PARSER_TEMPLATE),
            ("kb_summary", KB_SUMMARY_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} prompt template"))?;
        }
        Ok(Self { env, budget_bytes })
    }

    /// Render a configured system prompt, which may reference `ctx` values.
    pub fn system<S: Serialize>(&self, template: &str, ctx: S) -> Result<String> {
        let rendered = self
            .env
            .render_str(template, ctx)
            .context("render system prompt")?;
        Ok(rendered.trim().to_string())
    }

    pub fn prover(&self, prompt: &ProverPrompt<'_>) -> Result<String> {
        self.render("prover", prompt)
    }

    pub fn verifier(&self, prompt: &VerifierPrompt<'_>) -> Result<String> {
        self.render("verifier", prompt)
    }

    pub fn exploration(&self, prompt: &ExplorationPrompt<'_>) -> Result<String> {
        self.render("exploration", prompt)
    }

    pub fn parser(&self, prompt: &ParserPrompt<'_>) -> Result<String> {
        self.render("parser", prompt)
    }

    pub fn kb_summary(&self, prompt: &KbSummaryPrompt<'_>) -> Result<String> {
        self.render("kb_summary", prompt)
    }

    fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::with_capacity(markers.len());
    for (i, (_, end, key, required)) in markers.iter().enumerate() {
        let next = markers
            .get(i + 1)
            .map(|(start, ..)| *start)
            .unwrap_or(rendered.len());
        let content = rendered[*end..next].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let Some(last) = sections.last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(other_len);
    if last.content.len() <= allowed {
        return;
    }
    let before_len = last.content.len();
    const MARKER: &str = "\n[truncated]";
    let mut cut = allowed.saturating_sub(MARKER.len());
    while !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    if allowed > MARKER.len() {
        last.content.push_str(MARKER);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
