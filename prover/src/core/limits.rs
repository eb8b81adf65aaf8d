//! Numeric limits shared by the runtime and the agents.

/// Step cap used when neither the CLI nor the config provides one.
pub const DEFAULT_MAX_TOTAL_STEPS: u32 = 256;

/// Maximum number of ancestors rendered into a child's context hierarchy.
pub const CONTEXT_HIERARCHY_MAX_DEPTH: usize = 8;
/// Per-ancestor problem text clip in the context hierarchy.
pub const CONTEXT_HIERARCHY_PROBLEM_CHARS: usize = 600;

/// KB entry content clip when rendering the KB into prompts.
pub const KB_PROMPT_MAX_CONTENT_CHARS: usize = 320;
pub const KB_SUMMARY_TITLE_CHARS: usize = 120;
pub const KB_SUMMARY_STATEMENT_CHARS: usize = 320;

/// Per-item snippet clip when rendering routed context into prompts.
pub const LOCAL_CONTEXT_SNIPPET_CHARS: usize = 240;
/// Only the most recent items of `local_context` are rendered.
pub const DEFAULT_LOCAL_CONTEXT_LIMIT: usize = 8;

/// Upper bound for any single KB text field after normalization.
pub const KB_MAX_FIELD_CHARS: usize = 20_000;
