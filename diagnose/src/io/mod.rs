//! I/O adapters for diagnosis runs.

pub mod config;
pub mod document;
pub mod model;
pub mod playbook_store;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod ssh;
pub mod tool_config;
