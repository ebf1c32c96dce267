//! Process exit codes. These are part of the CLI contract.

pub const OK: i32 = 0;
/// A grader failed or errored, or strict replay missed a recording.
pub const GRADE_FAILED: i32 = 1;
/// Usage, configuration, I/O or trajectory validation error.
pub const CONFIG_ERROR: i32 = 2;
pub const REPLAY_TIMEOUT: i32 = 3;
