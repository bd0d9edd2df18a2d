//! Error taxonomy for tool calls, configuration loading and runs.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::state::Stage;

/// Failure of a single tool call.
///
/// These never abort a run: the invocation layer turns them into per-tool
/// error text that is fed back into the next dispatch prompt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// Malformed or missing call arguments.
    #[error("invalid arguments: {0}")]
    Argument(String),

    /// Command template unparseable or unsubstitutable.
    #[error("template error: {0}")]
    Template(String),

    /// No credentials resolvable for the node.
    #[error("auth error: {0}")]
    Auth(String),

    /// Process or session failure, or non-empty standard error.
    #[error("{0}")]
    Execution(String),

    /// Requested tool absent from the registry.
    #[error("tool not found")]
    NotFound(String),
}

/// Tool configuration could not be loaded. Nothing is installed when this is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: {0:?}")]
    UnsupportedFormat(String),

    #[error("parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("exec template '{template}' not found in tool family '{family}'")]
    UnknownTemplate { family: String, template: String },

    #[error("unsupported remote tool family '{0}' (expected 'bash')")]
    UnsupportedFamily(String),

    #[error("duplicate tool name '{0}'")]
    DuplicateTool(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal run error. The partial history is discarded.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "run exceeded {limit} stage transitions at step {step_index} (pending tools: {})",
        pending.join(",")
    )]
    RunLimit {
        limit: u32,
        step_index: usize,
        pending: Vec<String>,
    },

    #[error("model call failed during {stage}: {source:#}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("render prompt: {0:#}")]
    Prompt(#[source] anyhow::Error),
}
