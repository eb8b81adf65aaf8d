//! Deterministic multi-agent orchestration runtime.
//!
//! One problem is solved by a tree of agents that spawn each other. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, context graph,
//!   knowledge base, acceptance rule). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, completion
//!   processes, traces, reports). Isolated to enable scripting in tests.
//! - **[`agents`]**: The agent implementations behind the [`agents::Agent`]
//!   contract.
//!
//! [`scheduler`] drives one run over the context graph, one active node at a
//! time; [`solve`] wires config, agents and scheduler together for the CLI.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod scheduler;
pub mod solve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
