//! Execute the tool calls carried by one model reply.

use tracing::{debug, instrument, warn};

use crate::core::types::{ChatMessage, DispatchResults};
use crate::error::ToolError;
use crate::tools::registry::ToolRegistry;

/// Run every tool call of `message` in order and collect the outcomes by tool name.
///
/// Individual failures are recorded as error text and never abort the batch.
/// A message without tool calls yields empty aggregates.
#[instrument(skip_all, fields(calls = message.tool_calls.len()))]
pub fn execute_tool_calls(registry: &ToolRegistry, message: &ChatMessage) -> DispatchResults {
    let mut out = DispatchResults::default();
    for call in &message.tool_calls {
        out.requested.push(call.name.clone());
        let outcome = match registry.lookup(&call.name) {
            Some(tool) => tool.invoke(&call.arguments),
            None => Err(ToolError::NotFound(call.name.clone())),
        };
        match outcome {
            Ok(text) => {
                debug!(tool = %call.name, bytes = text.len(), "tool succeeded");
                out.errors.remove(&call.name);
                out.results.insert(call.name.clone(), text);
            }
            Err(err) => {
                warn!(tool = %call.name, err = %err, "tool failed");
                out.errors.insert(call.name.clone(), err.to_string());
            }
        }
    }
    out
}
