//! Shared deterministic types for the diagnosis core.
//!
//! These types define the contracts between the state machine, the model
//! collaborator and the tools. They carry no I/O and serialize stably.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Name of the implicit parameter identifying the target node.
pub const NODE_PARAM: &str = "node";

/// Placeholder used when synthesising values for free-form parameters.
const PLACEHOLDER_VALUE: &str = "value";

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id (may be empty for scripted replies).
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Raw JSON object text, passed to the tool untouched.
    pub arguments: String,
}

/// One message exchanged with the model collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant message that only carries tool calls.
    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Aggregates of one dispatch cycle, keyed by tool name.
///
/// Results and errors are kept apart: results shrink the pending set, errors
/// become context for the next dispatch prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResults {
    /// Tool names in the order the model requested them.
    pub requested: Vec<String>,
    pub results: BTreeMap<String, String>,
    pub errors: BTreeMap<String, String>,
}

impl DispatchResults {
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// Requested tools that produced no successful result.
    pub fn unresolved(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .requested
            .iter()
            .filter(|name| !self.results.contains_key(name.as_str()))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Allowed values; empty means free-form.
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// Result of `Tool::describe`: name, description and parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSchema> {
        self.parameters.iter().find(|param| param.name == name)
    }

    /// JSON Schema object describing the arguments, as sent to the model.
    ///
    /// All parameters are strings; `required` is sorted for stable output.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = json!({
                "type": "string",
                "description": param.description,
            });
            if !param.allowed.is_empty() {
                prop["enum"] = json!(param.allowed);
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(param.name.clone());
            }
        }
        required.sort();
        required.dedup();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Smallest argument set that satisfies the schema.
    ///
    /// Enumerated required parameters take their first allowed value; other
    /// required parameters take a placeholder. `node` is always present.
    pub fn minimal_arguments(&self, node: &str) -> BTreeMap<String, Value> {
        let mut args = BTreeMap::new();
        for param in self.parameters.iter().filter(|param| param.required) {
            let value = param
                .allowed
                .first()
                .cloned()
                .unwrap_or_else(|| PLACEHOLDER_VALUE.to_string());
            args.insert(param.name.clone(), Value::String(value));
        }
        args.insert(NODE_PARAM.to_string(), Value::String(node.to_string()));
        args
    }
}
