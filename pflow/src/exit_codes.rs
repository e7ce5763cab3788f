//! Stable exit codes for pflow CLI commands.

/// Command succeeded; for `run`, the workflow finished SUCCESS or DEGRADED.
pub const OK: i32 = 0;
/// Command failed: execution failure, IO error, or bad arguments.
pub const ERROR: i32 = 1;
/// The workflow was rejected by validation before execution.
pub const INVALID: i32 = 2;
