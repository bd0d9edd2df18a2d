//! Stable exit codes for the diagnose CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid playbook, tool config, run config or arguments.
pub const INVALID: i32 = 1;
/// The run failed: the model call or prompt rendering errored.
pub const RUN_FAILED: i32 = 2;
/// The run hit the stage transition ceiling.
pub const RUN_LIMIT: i32 = 3;
