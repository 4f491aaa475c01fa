//! Incremental, server-curated test runner for console programs.
//!
//! A learner's program is driven through a challenge one batch of tests at a
//! time. The service reveals expected output only once the program matches
//! it, and tracks each attempt's progress. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (document parsing, judging, line
//!   diffs, the attempt transition table). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, child processes, the
//!   embedded store, HTTP calls). Isolated behind traits where tests need fakes.
//!
//! Orchestration modules ([`run`], [`progress`], [`batch`]) coordinate core
//! logic with I/O to implement CLI commands and service endpoints.

pub mod batch;
pub mod core;
pub mod exit_codes;
pub mod guidance;
pub mod io;
pub mod logging;
pub mod progress;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
