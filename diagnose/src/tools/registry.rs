//! Named tool set built from tool configuration documents.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::{info, instrument};

use crate::core::types::ToolSchema;
use crate::error::ConfigError;
use crate::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;
use crate::io::tool_config::{ToolDocument, ToolFamily, load_tool_document};
use crate::tools::Tool;
use crate::tools::command::{CommandTool, ExecMode};

/// Mapping from unique tool name to tool.
///
/// Loading is total-or-nothing: a failed load leaves the registry as it was.
/// A successful load replaces the whole set.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
    output_limit_bytes: usize,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("output_limit_bytes", &self.output_limit_bytes)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_output_limit(DEFAULT_OUTPUT_LIMIT_BYTES)
    }

    pub fn with_output_limit(output_limit_bytes: usize) -> Self {
        Self {
            tools: BTreeMap::new(),
            output_limit_bytes,
        }
    }

    /// Load a tool configuration file and replace the current tool set.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(&mut self, path: &Path) -> Result<(), ConfigError> {
        let doc = load_tool_document(path)?;
        self.install(&doc)
    }

    /// Build every template of `doc` and swap the result in.
    pub fn install(&mut self, doc: &ToolDocument) -> Result<(), ConfigError> {
        doc.validate()?;
        let mut tools: BTreeMap<String, Box<dyn Tool>> = BTreeMap::new();
        self.build_families(&doc.local_tools, ExecMode::Local, &mut tools)?;
        self.build_families(&doc.inner_tools, ExecMode::Remote, &mut tools)?;
        info!(tools = tools.len(), "tool registry loaded");
        self.tools = tools;
        Ok(())
    }

    fn build_families(
        &self,
        families: &[ToolFamily],
        mode: ExecMode,
        into: &mut BTreeMap<String, Box<dyn Tool>>,
    ) -> Result<(), ConfigError> {
        for family in families {
            for template in &family.exec_templates {
                if into.contains_key(&template.name) {
                    return Err(ConfigError::DuplicateTool(template.name.clone()));
                }
                let tool = CommandTool::new(mode, family, &template.name, self.output_limit_bytes)?;
                into.insert(template.name.clone(), Box::new(tool));
            }
        }
        Ok(())
    }

    /// Add or replace a single tool under `name`.
    pub fn register(&mut self, name: impl Into<String>, tool: Box<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of the named tools that are registered, in the given order.
    pub fn schemas_for<'a, I>(&self, names: I) -> Vec<ToolSchema>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(|name| self.lookup(name))
            .map(|tool| tool.describe())
            .collect()
    }

    /// Schemas of every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.describe()).collect()
    }
}
