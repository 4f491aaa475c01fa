//! Stable exit codes for lockstep CLI commands.

/// Command succeeded; for `lockstep test`, every selected test passed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, documents, store state or other errors.
pub const INVALID: i32 = 1;
/// `lockstep test` or `lockstep check` halted on a failing test.
pub const FAILED: i32 = 2;
