//! Stable exit codes for prover CLI commands.

/// Command succeeded; for `run`, the root finished with a solution.
pub const OK: i32 = 0;
/// Invalid config or input, or a runtime error before a report could be written.
pub const INVALID: i32 = 1;
/// `prover run` finished as failed (step budget, root failure). The report is still written.
pub const RUN_FAILED: i32 = 2;
