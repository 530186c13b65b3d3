//! Stable exit codes for harness CLI commands.

/// Command succeeded and every executed unit passed.
pub const OK: i32 = 0;
/// At least one unit failed during the run.
pub const UNIT_FAILURES: i32 = 1;
/// Command failed due to invalid usage, config or an engine-level error.
pub const INVALID: i32 = 2;
