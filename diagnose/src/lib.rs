//! Playbook-driven infrastructure diagnosis.
//!
//! A playbook is an ordered list of steps. For each step a language model picks
//! and calls templated command tools, local or over ssh. It then writes a
//! conclusion, and the run ends with a report over all conclusions. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (run state, auth resolution, schemas).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, process and ssh execution,
//!   the model client, prompt rendering).
//! - **[`tools`]**: The tool capability, the command tool and the registry.
//!
//! [`diagnosis`] drives the state machine; [`report`] compiles the final text.

pub mod core;
pub mod diagnosis;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod playbook;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
