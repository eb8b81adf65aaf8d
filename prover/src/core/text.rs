//! Text normalization shared by agents and the knowledge base.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::limits::{
    DEFAULT_LOCAL_CONTEXT_LIMIT, KB_MAX_FIELD_CHARS, LOCAL_CONTEXT_SNIPPET_CHARS,
};
use crate::core::types::{
    ContextItem, ContextResult, KbEntry, KbKind, NodeId, Normalized, SolutionAttempt,
};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A```[\w+-]*\n(.*)\n```\z").unwrap());
static OUTPUT_TYPE_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^output\s*type\s*:").unwrap());
static SOLUTION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^solution\s*:").unwrap());
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static PARAGRAPH_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Trim and cut to `limit` characters, marking the cut with an ellipsis.
pub fn clip(text: &str, limit: usize) -> String {
    let cleaned = text.trim();
    if cleaned.chars().count() <= limit {
        return cleaned.to_string();
    }
    let kept: String = cleaned.chars().take(limit.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

/// Collapse runs of three or more newlines into a single blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN_RE.replace_all(text, "\n\n").into_owned()
}

/// Trim, collapse blank runs, and clip a KB text block.
pub fn normalize_block(text: &str, max_chars: usize) -> String {
    clip(&collapse_blank_lines(text.trim()), max_chars)
}

/// Strip scaffolding that provers wrap around their answers.
///
/// Removes a surrounding code fence and leading `Output type:` / `Solution:`
/// header lines, then collapses blank runs.
pub fn clean_solution_text(text: &str) -> String {
    let mut stripped = text.trim();
    if let Some(caps) = FENCE_RE.captures(stripped)
        && let Some(body) = caps.get(1)
    {
        stripped = body.as_str();
    }

    let mut lines = Vec::new();
    let mut skipping_prefix = true;
    for line in stripped.lines() {
        let trimmed = line.trim();
        if skipping_prefix {
            if trimmed.is_empty()
                || OUTPUT_TYPE_PREFIX_RE.is_match(trimmed)
                || SOLUTION_PREFIX_RE.is_match(trimmed)
            {
                continue;
            }
            skipping_prefix = false;
        }
        lines.push(line.trim_end());
    }

    collapse_blank_lines(lines.join("\n").trim())
}

/// True if the paragraph is a standalone `\[...\]` or `$$...$$` block.
pub fn looks_like_display_math(paragraph: &str) -> bool {
    let stripped = paragraph.trim();
    !stripped.is_empty()
        && ((stripped.starts_with("\\[") && stripped.ends_with("\\]"))
            || (stripped.len() >= 4 && stripped.starts_with("$$") && stripped.ends_with("$$")))
}

/// Pick the concluding statement of a longer solution.
///
/// Takes the last paragraph; a trailing display-math block pulls in the
/// paragraph that introduces it.
pub fn extract_result_snippet(text: &str, max_chars: usize) -> String {
    let cleaned = clean_solution_text(text);
    if cleaned.is_empty() {
        return String::new();
    }

    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT_RE
        .split(&cleaned)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();

    let snippet = match paragraphs.as_slice() {
        [] => cleaned.clone(),
        [.., previous, last] if looks_like_display_math(last) => format!("{previous}\n{last}"),
        [.., last] => (*last).to_string(),
    };
    clip(&snippet, max_chars)
}

/// First line of the result snippet, or `fallback` when the text is empty.
pub fn derive_result_title(text: &str, fallback: &str, title_chars: usize) -> String {
    let snippet = extract_result_snippet(text, KB_MAX_FIELD_CHARS);
    let first_line = snippet.lines().next().map(str::trim).unwrap_or_default();
    let title = if first_line.is_empty() {
        fallback
    } else {
        first_line
    };
    clip(title, title_chars)
}

/// Auto-generated `Result` entry for a node's answer.
pub fn make_kb_entry(node_id: NodeId, fallback_title: &str, content: &str) -> KbEntry {
    KbEntry::new(
        format!("Result {node_id}"),
        KbKind::Result,
        derive_result_title(content, fallback_title, KB_MAX_FIELD_CHARS),
        extract_result_snippet(content, KB_MAX_FIELD_CHARS),
    )
    .with_source(format!("agent-{node_id}"))
}

/// Clean agent-supplied KB entries before they ride on an attempt.
///
/// `Result` entries keep only their concluding snippet; other kinds keep the
/// cleaned body.
pub fn prepare_kb_entries(entries: impl IntoIterator<Item = KbEntry>) -> Vec<KbEntry> {
    entries
        .into_iter()
        .map(|entry| {
            let content = match entry.kind {
                KbKind::Result => extract_result_snippet(&entry.content, KB_MAX_FIELD_CHARS),
                _ => clip(&clean_solution_text(&entry.content), KB_MAX_FIELD_CHARS),
            };
            KbEntry {
                id: entry.id.trim().to_string(),
                title: entry.title.trim().to_string(),
                content: collapse_blank_lines(&content),
                ..entry
            }
        })
        .collect()
}

/// Compact Markdown view of the most recent routed context items.
pub fn format_local_context(items: &[ContextItem]) -> String {
    let start = items.len().saturating_sub(DEFAULT_LOCAL_CONTEXT_LIMIT);
    items[start..]
        .iter()
        .map(|item| format!("- **{}#{}**: {}", item.agent_type, item.from, item_snippet(item)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn item_snippet(item: &ContextItem) -> String {
    let output = match &item.result {
        ContextResult::Failed { reason } => {
            return format!("failed ({})", clip(reason, LOCAL_CONTEXT_SNIPPET_CHARS));
        }
        ContextResult::Output(output) => output,
    };
    match &output.normalized {
        Some(Normalized::Solution(SolutionAttempt {
            final_answer,
            accepted,
            ..
        })) => {
            let tag = if *accepted { "" } else { " (unverified)" };
            format!("{}{tag}", clip(final_answer, LOCAL_CONTEXT_SNIPPET_CHARS))
        }
        Some(Normalized::Verification(report)) => {
            let verdict = if report.accepted { "accepted" } else { "rejected" };
            format!("verdict={verdict}, scores={:?}", report.attempt_scores)
        }
        Some(Normalized::Questions(questions)) if questions.questions.is_empty() => {
            "no questions".to_string()
        }
        Some(Normalized::Questions(questions)) => {
            format!("{} questions", questions.questions.len())
        }
        Some(Normalized::WorkerStatus(status)) => format!(
            "phase={:?}, round={}, provers_spawned={}",
            status.phase, status.round_index, status.provers_spawned
        ),
        Some(Normalized::OrchestratorStatus(status)) => format!(
            "phase={:?}, message={}",
            status.phase,
            clip(&status.message, LOCAL_CONTEXT_SNIPPET_CHARS)
        ),
        Some(Normalized::Parsed(value)) => clip(&value.to_string(), LOCAL_CONTEXT_SNIPPET_CHARS),
        Some(Normalized::Text(text)) => clip(text, LOCAL_CONTEXT_SNIPPET_CHARS),
        None => clip(&output.raw_text, LOCAL_CONTEXT_SNIPPET_CHARS),
    }
}
