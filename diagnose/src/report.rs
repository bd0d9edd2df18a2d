//! Final report compilation.

use tracing::{debug, instrument};

use crate::core::state::Stage;
use crate::error::RunError;
use crate::io::config::ReportMode;
use crate::io::model::{ChatModel, ChatRequest};
use crate::io::prompt::PromptEngine;
use crate::playbook::{Playbook, Record};

/// Turns a finished history into report text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportCompiler {
    mode: ReportMode,
}

impl ReportCompiler {
    pub fn new(mode: ReportMode) -> Self {
        Self { mode }
    }

    /// Render the history. In model mode the rendering is summarised by `model`;
    /// an empty history is never sent to the model.
    #[instrument(skip_all, fields(mode = ?self.mode, records = history.len()))]
    pub fn compile<M: ChatModel>(
        &self,
        prompts: &PromptEngine,
        playbook: &Playbook,
        history: &[Record],
        model: &M,
    ) -> Result<String, RunError> {
        let rendered = prompts
            .render_report(playbook, history)
            .map_err(RunError::Prompt)?;
        if self.mode == ReportMode::Template || history.is_empty() {
            return Ok(rendered);
        }

        let messages = prompts
            .report_summary_messages(&rendered)
            .map_err(RunError::Prompt)?;
        let reply = model
            .generate(&ChatRequest {
                stage: Stage::Report,
                messages: &messages,
                tools: &[],
            })
            .map_err(|source| RunError::Collaborator {
                stage: Stage::Report,
                source,
            })?;
        debug!(bytes = reply.content.len(), "model summarised report");
        Ok(reply.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ChatMessage;
    use crate::test_support::ScriptedModel;

    fn history() -> Vec<Record> {
        vec![Record {
            details: "check disk".to_string(),
            conclusion: "95% used".to_string(),
        }]
    }

    #[test]
    fn template_mode_never_calls_the_model() {
        let prompts = PromptEngine::new().expect("prompts");
        let model = ScriptedModel::new(Vec::new());
        let report = ReportCompiler::new(ReportMode::Template)
            .compile(&prompts, &Playbook::default(), &history(), &model)
            .expect("compile");
        assert!(report.contains("95% used"));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn model_mode_returns_model_summary() {
        let prompts = PromptEngine::new().expect("prompts");
        let model = ScriptedModel::new(vec![ChatMessage::assistant("disk nearly full")]);
        let report = ReportCompiler::new(ReportMode::Model)
            .compile(&prompts, &Playbook::default(), &history(), &model)
            .expect("compile");
        assert_eq!(report, "disk nearly full");
        let requests = model.requests();
        assert_eq!(requests[0].stage, Stage::Report);
        assert!(requests[0].messages[1].content.contains("check disk"));
    }

    #[test]
    fn model_mode_with_empty_history_renders_directly() {
        let prompts = PromptEngine::new().expect("prompts");
        let model = ScriptedModel::new(Vec::new());
        let report = ReportCompiler::new(ReportMode::Model)
            .compile(&prompts, &Playbook::default(), &[], &model)
            .expect("compile");
        assert!(report.contains("No steps executed."));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn model_failure_is_a_collaborator_error() {
        let prompts = PromptEngine::new().expect("prompts");
        let model = ScriptedModel::new(Vec::new());
        let err = ReportCompiler::new(ReportMode::Model)
            .compile(&prompts, &Playbook::default(), &history(), &model)
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Collaborator {
                stage: Stage::Report,
                ..
            }
        ));
    }
}
