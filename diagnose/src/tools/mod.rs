//! Tools the model can call during dispatch.
//!
//! A tool is anything that can describe its arguments and turn a raw
//! argument string into result text. The registry owns the tool set; the
//! invocation layer executes the calls of one model reply.

pub mod command;
pub mod invocation;
pub mod registry;
pub mod template;

use crate::core::types::ToolSchema;
use crate::error::ToolError;

/// Capability implemented by every callable tool.
pub trait Tool {
    fn describe(&self) -> ToolSchema;

    /// `arguments` is the raw JSON object text supplied by the model.
    fn invoke(&self, arguments: &str) -> Result<String, ToolError>;
}
