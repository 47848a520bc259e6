//! Stable exit codes for player CLI commands.

/// Command succeeded, or every task run succeeded.
pub const OK: i32 = 0;
/// Invalid config, game file, or arguments, or an environment error (no adb, no device).
pub const INVALID: i32 = 1;
/// At least one task run failed.
pub const TASK_FAILED: i32 = 2;
/// The run was stopped by the operator or an external stop request.
pub const STOPPED: i32 = 3;
