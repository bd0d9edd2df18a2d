//! Prompt rendering for the dispatch, analysis and report stages.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::ChatMessage;
use crate::playbook::{Playbook, Record, Step};

const DISPATCH_SYSTEM_TEMPLATE: &str = include_str!("prompts/dispatch_system.md");
const DISPATCH_USER_TEMPLATE: &str = include_str!("prompts/dispatch_user.md");
const ANALYSIS_TEMPLATE: &str = include_str!("prompts/analysis.md");
const REPORT_TEMPLATE: &str = include_str!("prompts/report.md");
const REPORT_SUMMARY_TEMPLATE: &str = include_str!("prompts/report_summary.md");

/// Everything the dispatch prompt may show.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub middleware: &'a str,
    pub step: &'a Step,
    pub history: &'a [Record],
    pub pending: &'a BTreeSet<String>,
    pub results: &'a BTreeMap<String, String>,
    pub errors: &'a BTreeMap<String, String>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("dispatch_system", DISPATCH_SYSTEM_TEMPLATE)
            .context("dispatch_system template")?;
        env.add_template("dispatch_user", DISPATCH_USER_TEMPLATE)
            .context("dispatch_user template")?;
        env.add_template("analysis", ANALYSIS_TEMPLATE)
            .context("analysis template")?;
        env.add_template("report", REPORT_TEMPLATE)
            .context("report template")?;
        env.add_template("report_summary", REPORT_SUMMARY_TEMPLATE)
            .context("report_summary template")?;
        Ok(Self { env })
    }

    /// System + user messages for one dispatch model call.
    pub fn dispatch_messages(&self, ctx: &DispatchContext<'_>) -> Result<Vec<ChatMessage>> {
        let system = self.env.get_template("dispatch_system")?.render(context! {
            middleware => ctx.middleware.trim(),
            history => ctx.history,
        })?;
        let user = self.env.get_template("dispatch_user")?.render(context! {
            step => ctx.step,
            pending => ctx.pending,
            results => ctx.results,
            errors => ctx.errors,
        })?;
        debug!(
            system_bytes = system.len(),
            user_bytes = user.len(),
            "rendered dispatch prompt"
        );
        Ok(vec![
            ChatMessage::system(system.trim()),
            ChatMessage::user(user.trim()),
        ])
    }

    /// Single user message asking for the step's conclusion. Carries no node or auth detail.
    pub fn analysis_messages(
        &self,
        step: &Step,
        results: &BTreeMap<String, String>,
    ) -> Result<Vec<ChatMessage>> {
        let rendered = self.env.get_template("analysis")?.render(context! {
            step => step,
            results => results,
        })?;
        Ok(vec![ChatMessage::user(rendered.trim())])
    }

    /// Deterministic report over the history.
    pub fn render_report(&self, playbook: &Playbook, history: &[Record]) -> Result<String> {
        let rendered = self.env.get_template("report")?.render(context! {
            name => playbook.name.trim(),
            task_goal => playbook.task_goal.trim(),
            history => history,
        })?;
        let mut out = rendered.trim().to_string();
        out.push('\n');
        Ok(out)
    }

    /// Messages asking the model to summarise a rendered report.
    pub fn report_summary_messages(&self, rendered_report: &str) -> Result<Vec<ChatMessage>> {
        let system = self.env.get_template("report_summary")?.render(context! {})?;
        Ok(vec![
            ChatMessage::system(system.trim()),
            ChatMessage::user(rendered_report.trim()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{playbook, step};

    fn record(details: &str, conclusion: &str) -> Record {
        Record {
            details: details.to_string(),
            conclusion: conclusion.to_string(),
        }
    }

    #[test]
    fn dispatch_prompt_shows_pending_results_and_errors() {
        let engine = PromptEngine::new().expect("engine");
        let step = step("memory", &["info", "slowlog"]);
        let pending = BTreeSet::from(["slowlog".to_string()]);
        let results = BTreeMap::from([("info".to_string(), "used_memory:1G".to_string())]);
        let errors = BTreeMap::from([("slowlog".to_string(), "tool not found".to_string())]);
        let history = vec![record("check connectivity", "reachable")];

        let messages = engine
            .dispatch_messages(&DispatchContext {
                middleware: "redis",
                step: &step,
                history: &history,
                pending: &pending,
                results: &results,
                errors: &errors,
            })
            .expect("render");

        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("redis"));
        assert!(messages[0].content.contains("Conclusion: reachable"));
        let user = &messages[1].content;
        assert!(user.contains(&step.details));
        let declared = user.find("Tools declared for this step").expect("declared");
        let pending_at = user.find("Tools still to run").expect("pending");
        assert!(user[declared..pending_at].contains("- info"));
        assert!(user[declared..pending_at].contains("- slowlog"));
        assert!(!user[pending_at..].contains("- info"));
        assert!(user.contains("- slowlog"));
        assert!(user.contains("used_memory:1G"));
        assert!(user.contains("Error: tool not found"));
    }

    #[test]
    fn dispatch_prompt_omits_empty_sections() {
        let engine = PromptEngine::new().expect("engine");
        let step = step("only", &[]);
        let messages = engine
            .dispatch_messages(&DispatchContext {
                middleware: "",
                step: &step,
                history: &[],
                pending: &BTreeSet::new(),
                results: &BTreeMap::new(),
                errors: &BTreeMap::new(),
            })
            .expect("render");
        assert!(!messages[0].content.contains("Concluded steps"));
        assert!(!messages[1].content.contains("Error:"));
        assert!(!messages[1].content.contains("Tools still to run"));
        assert!(!messages[1].content.contains("Tools declared"));
    }

    #[test]
    fn analysis_prompt_falls_back_when_no_output() {
        let engine = PromptEngine::new().expect("engine");
        let messages = engine
            .analysis_messages(&step("s", &[]), &BTreeMap::new())
            .expect("render");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("No tool output"));
    }

    #[test]
    fn report_lists_history_in_order() {
        let engine = PromptEngine::new().expect("engine");
        let book = playbook(vec![step("a", &[]), step("b", &[])]);
        let history = vec![record("first", "ok"), record("second", "degraded")];
        let report = engine.render_report(&book, &history).expect("render");
        let first = report.find("1. first").expect("first");
        let second = report.find("2. second").expect("second");
        assert!(first < second);
        assert!(report.contains("degraded"));
        assert!(!report.contains("No steps executed"));
    }

    #[test]
    fn empty_history_report_says_so() {
        let engine = PromptEngine::new().expect("engine");
        let report = engine
            .render_report(&Playbook::default(), &[])
            .expect("render");
        assert!(report.contains("No steps executed."));
    }
}
