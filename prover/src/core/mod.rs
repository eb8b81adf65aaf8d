//! Deterministic, pure logic shared by the orchestration runtime.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod acceptance;
pub mod graph;
pub mod invariants;
pub mod kb;
pub mod limits;
pub mod text;
pub mod types;
