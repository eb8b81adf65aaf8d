//! Side-effecting adapters: config files, the completion service, prompts,
//! traces, and reports.

pub mod completion;
pub mod config;
pub mod process;
pub mod prompt;
pub mod report;
pub mod trace;
