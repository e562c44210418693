//! Stable exit codes for refiner CLI commands.

/// Command succeeded, or the objective was met.
pub const OK: i32 = 0;
/// Invalid config/layout, or any other error.
pub const INVALID: i32 = 1;
/// The loop ran out of budget, or `refiner evaluate` did not meet the objective.
pub const EXHAUSTED: i32 = 2;
/// A model-selected path escaped the sandbox.
pub const SANDBOX_VIOLATION: i32 = 3;
