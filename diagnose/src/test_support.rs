//! Test-only collaborators and builders for playbooks, tools and tool documents.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};

use crate::core::state::Stage;
use crate::core::types::{ChatMessage, ParameterSchema, ToolCall, ToolSchema};
use crate::error::ToolError;
use crate::io::model::{ChatModel, ChatRequest};
use crate::playbook::{Playbook, Step};
use crate::tools::Tool;

/// Create a deterministic step whose details are derived from its name.
pub fn step(name: &str, tools: &[&str]) -> Step {
    Step {
        name: name.to_string(),
        details: format!("{} details", name),
        tool_list: tools.iter().map(|t| t.to_string()).collect(),
    }
}

/// Create a playbook with fixed metadata around `steps`.
pub fn playbook(steps: Vec<Step>) -> Playbook {
    Playbook {
        id: 1,
        name: "test playbook".to_string(),
        task_goal: "find the fault".to_string(),
        middleware: "redis".to_string(),
        steps,
    }
}

pub fn tool_call(name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: format!("call-{}", name),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

/// A model request as seen by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub stage: Stage,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

/// Model that replays queued replies, or repeats one reply forever.
///
/// An exhausted queue is a model failure.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ChatMessage>>,
    repeat: Option<ChatMessage>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            repeat: None,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn repeating(reply: ChatMessage) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }
}

impl ChatModel for ScriptedModel {
    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatMessage> {
        self.requests.borrow_mut().push(RecordedRequest {
            stage: request.stage,
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        if let Some(reply) = self.replies.borrow_mut().pop_front() {
            return Ok(reply);
        }
        self.repeat
            .clone()
            .ok_or_else(|| anyhow!("scripted model has no reply left"))
    }
}

/// Tool with a fixed outcome that counts its invocations.
pub struct StaticTool {
    name: String,
    outcome: Result<String, ToolError>,
    calls: Arc<AtomicUsize>,
}

impl StaticTool {
    pub fn ok(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Ok(output.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str, err: ToolError) -> Self {
        Self {
            name: name.to_string(),
            outcome: Err(err),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter that stays readable after the tool is boxed into a registry.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Tool for StaticTool {
    fn describe(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: format!("{} (static)", self.name),
            parameters: vec![ParameterSchema {
                name: "node".to_string(),
                description: String::new(),
                required: true,
                allowed: Vec::new(),
            }],
        }
    }

    fn invoke(&self, _arguments: &str) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// YAML tool document with one local family holding `name: exec` templates.
pub fn local_tool_yaml(templates: &[(&str, &str)]) -> String {
    let mut out = String::from("local_tools:\n  - toolName: local\n    timeout: 10\n    execTemplates:\n");
    for (name, exec) in templates {
        out.push_str(&format!(
            "      - name: {}\n        description: {} probe\n        exec: {:?}\n",
            name, name, exec
        ));
    }
    out
}

/// Write `contents` to `dir/file_name` and return the path.
pub fn write_file(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.join(file_name);
    if let Err(err) = fs::write(&path, contents) {
        panic!("write {}: {}", path.display(), err);
    }
    path
}

/// A fresh scratch directory.
pub fn scratch_dir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("tempdir: {}", err),
    }
}
