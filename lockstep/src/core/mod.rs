//! Deterministic, pure logic shared by the CLI and the service.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod attempt;
pub mod diff;
pub mod migrate;
pub mod parser;
pub mod types;
pub mod validation;
