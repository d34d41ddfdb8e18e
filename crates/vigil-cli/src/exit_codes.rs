//! Process exit codes. These are part of the public contract; CI pipelines
//! branch on them.

pub const SUCCESS: i32 = 0;
pub const FAILED: i32 = 1; // A control failed at or above the --fail-on severity
pub const CONFIG_ERROR: i32 = 2; // Bad arguments, configuration or control catalog; no report
pub const INCOMPLETE: i32 = 3; // Error verdicts present or the run was cancelled
