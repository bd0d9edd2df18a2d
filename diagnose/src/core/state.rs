//! Diagnostic run state and its deterministic transitions.
//!
//! The state machine owns one [`DiagnosticState`] per run. Handlers in this
//! module mutate it; they perform no I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::core::types::DispatchResults;
use crate::playbook::{Playbook, Record, Step};

/// Stages of the diagnosis state machine.
///
/// `DispatchModel` and `AnalyzeModel` are the model-call points; each has
/// exactly one successor handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dispatch,
    DispatchModel,
    Analyze,
    AnalyzeModel,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::DispatchModel => "dispatch_model",
            Self::Analyze => "analyze",
            Self::AnalyzeModel => "analyze_model",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the run goes after a step's conclusion is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAdvance {
    /// Another step remains; pending tools were re-seeded.
    Next,
    /// All steps are concluded.
    Finished,
}

/// Mutable record threaded through the state machine.
///
/// Invariants: `pending_tools` only shrinks within a step and is re-seeded at
/// step transitions; `history.len() == current_step` between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticState {
    current_step: usize,
    step_count: usize,
    pending_tools: BTreeSet<String>,
    tool_results: BTreeMap<String, String>,
    tool_errors: BTreeMap<String, String>,
    history: Vec<Record>,
}

impl DiagnosticState {
    /// Fresh state for `playbook`, seeded with the first step's tools.
    pub fn new(playbook: &Playbook) -> Self {
        let mut state = Self {
            step_count: playbook.len(),
            ..Self::default()
        };
        if let Some(step) = playbook.steps.first() {
            state.seed_pending(step);
        }
        state
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// True once every step has a recorded conclusion.
    pub fn is_finished(&self) -> bool {
        self.current_step >= self.step_count
    }

    pub fn pending_tools(&self) -> &BTreeSet<String> {
        &self.pending_tools
    }

    pub fn tool_results(&self) -> &BTreeMap<String, String> {
        &self.tool_results
    }

    pub fn tool_errors(&self) -> &BTreeMap<String, String> {
        &self.tool_errors
    }

    pub fn history(&self) -> &[Record] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Record> {
        self.history
    }

    /// Merge one dispatch cycle's aggregates.
    ///
    /// Errors replace the previous cycle's errors wholesale. Each successful
    /// result is stored (overwriting) and its tool leaves the pending set.
    pub fn apply_dispatch(&mut self, dispatch: DispatchResults) {
        let DispatchResults {
            results, errors, ..
        } = dispatch;
        self.tool_errors = errors;
        for (name, output) in results {
            self.pending_tools.remove(&name);
            self.tool_results.insert(name, output);
        }
    }

    /// Append the current step's conclusion and advance the step index.
    pub fn record_conclusion(&mut self, playbook: &Playbook, conclusion: String) -> StepAdvance {
        let details = playbook
            .steps
            .get(self.current_step)
            .map(|step| step.details.clone())
            .unwrap_or_default();
        self.history.push(Record {
            details,
            conclusion,
        });
        self.current_step += 1;

        // Results and errors are step-local; unresolved tools are dropped.
        self.tool_results.clear();
        self.tool_errors.clear();
        self.pending_tools.clear();

        match playbook.steps.get(self.current_step) {
            Some(step) => {
                self.seed_pending(step);
                StepAdvance::Next
            }
            None => StepAdvance::Finished,
        }
    }

    fn seed_pending(&mut self, step: &Step) {
        self.pending_tools = step.tool_list.iter().cloned().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{playbook, step};

    fn dispatch(results: &[(&str, &str)], errors: &[(&str, &str)]) -> DispatchResults {
        DispatchResults {
            requested: Vec::new(),
            results: results
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            errors: errors
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn new_state_seeds_first_step() {
        let book = playbook(vec![step("a", &["t1", "t2"]), step("b", &["t3"])]);
        let state = DiagnosticState::new(&book);
        assert_eq!(state.current_step(), 0);
        assert!(!state.is_finished());
        assert_eq!(
            state.pending_tools().iter().cloned().collect::<Vec<_>>(),
            vec!["t1".to_string(), "t2".to_string()]
        );
    }

    #[test]
    fn empty_playbook_starts_finished() {
        let state = DiagnosticState::new(&playbook(Vec::new()));
        assert!(state.is_finished());
        assert!(state.history().is_empty());
    }

    #[test]
    fn dispatch_removes_succeeded_tools_and_replaces_errors() {
        let book = playbook(vec![step("a", &["t1", "t2"])]);
        let mut state = DiagnosticState::new(&book);

        state.apply_dispatch(dispatch(&[("t1", "ok")], &[("t2", "boom")]));
        assert_eq!(state.pending_tools().len(), 1);
        assert_eq!(state.tool_results()["t1"], "ok");
        assert_eq!(state.tool_errors()["t2"], "boom");

        state.apply_dispatch(dispatch(&[("t2", "fine")], &[]));
        assert!(state.pending_tools().is_empty());
        assert!(state.tool_errors().is_empty());
        assert_eq!(state.tool_results().len(), 2);
    }

    #[test]
    fn results_for_undeclared_tools_are_kept_without_touching_pending() {
        let book = playbook(vec![step("a", &["t1"])]);
        let mut state = DiagnosticState::new(&book);
        state.apply_dispatch(dispatch(&[("other", "x")], &[]));
        assert!(state.pending_tools().contains("t1"));
        assert_eq!(state.tool_results()["other"], "x");
    }

    #[test]
    fn conclusions_advance_and_reseed_until_finished() {
        let book = playbook(vec![step("a", &["t1"]), step("b", &["t2"])]);
        let mut state = DiagnosticState::new(&book);
        state.apply_dispatch(dispatch(&[("t1", "ok")], &[("x", "err")]));

        let advance = state.record_conclusion(&book, "first".to_string());
        assert_eq!(advance, StepAdvance::Next);
        assert_eq!(state.current_step(), 1);
        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history()[0].details, book.steps[0].details);
        assert!(state.tool_results().is_empty());
        assert!(state.tool_errors().is_empty());
        assert!(state.pending_tools().contains("t2"));

        let advance = state.record_conclusion(&book, "second".to_string());
        assert_eq!(advance, StepAdvance::Finished);
        assert!(state.is_finished());
        assert!(state.pending_tools().is_empty());
        assert_eq!(state.history().len(), 2);
    }
}
