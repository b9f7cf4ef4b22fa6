//! Stable exit codes for traversal CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// The query file or configuration is invalid, or another non-step error occurred.
pub const INVALID: i32 = 1;
/// A step failed while the query was running (e.g. a predicate or body op error).
pub const STEP_FAILED: i32 = 2;
