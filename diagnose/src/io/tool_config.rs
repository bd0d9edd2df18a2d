//! Tool configuration documents: local and remote command-template families.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::auth::AuthConfig;
use crate::core::types::ParameterSchema;
use crate::error::ConfigError;
use crate::io::document::read_document;

/// Timeout applied when neither the template nor its family declares one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The only remote family currently supported.
pub const REMOTE_SHELL_FAMILY: &str = "bash";

/// Root of a tool configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDocument {
    /// Families whose templates run on this machine.
    pub local_tools: Vec<ToolFamily>,
    /// Families whose templates run on the target node over ssh.
    pub inner_tools: Vec<ToolFamily>,
}

/// A group of templates sharing one auth policy and default timeout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolFamily {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub description: String,
    /// Seconds.
    pub timeout: Option<u64>,
    #[serde(rename = "authConfig")]
    pub auth_config: Option<AuthConfig>,
    #[serde(rename = "execTemplates")]
    pub exec_templates: Vec<ExecTemplate>,
    /// Free-form, descriptive only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ToolFamily {
    pub fn template(&self, name: &str) -> Option<&ExecTemplate> {
        self.exec_templates.iter().find(|tpl| tpl.name == name)
    }

    /// Effective timeout for a template of this family.
    pub fn timeout_for(&self, template: &ExecTemplate) -> Duration {
        let secs = template
            .timeout
            .or(self.timeout)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }
}

/// One named command template; becomes one tool in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecTemplate {
    pub name: String,
    pub description: String,
    pub exec: String,
    pub timeout: Option<u64>,
    pub parameters: Vec<ParameterSchema>,
}

/// Load a tool document from a `.yaml`, `.yml` or `.json` file.
pub fn load_tool_document(path: &Path) -> Result<ToolDocument, ConfigError> {
    let doc: ToolDocument = read_document(path)?;
    doc.validate()?;
    Ok(doc)
}

impl ToolDocument {
    /// Structural checks that do not depend on rendering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for family in &self.inner_tools {
            if family.tool_name != REMOTE_SHELL_FAMILY {
                return Err(ConfigError::UnsupportedFamily(family.tool_name.clone()));
            }
        }
        for family in self.local_tools.iter().chain(&self.inner_tools) {
            for template in &family.exec_templates {
                if template.name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "tool family '{}' has a template without a name",
                        family.tool_name
                    )));
                }
                if template.exec.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "template '{}' has an empty exec",
                        template.name
                    )));
                }
            }
        }
        Ok(())
    }
}
