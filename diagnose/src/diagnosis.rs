//! Diagnosis state machine.
//!
//! A run walks the playbook step by step through five stages:
//!
//! ```text
//! Dispatch ──(pending empty)──────────────► Analyze ──► AnalyzeModel ──┬─► Dispatch (next step)
//!    │                                         ▲                       └─► Report (last step)
//!    └─► DispatchModel ──(pending empty)───────┘
//!             └──(pending left)──► Dispatch
//! ```
//!
//! Every stage entry counts as one transition. Exceeding the configured
//! ceiling aborts the run with [`RunError::RunLimit`]; nothing is reported.

use tracing::{debug, info, instrument, warn};

use crate::core::state::{DiagnosticState, Stage, StepAdvance};
use crate::core::types::{ChatMessage, DispatchResults, ToolSchema};
use crate::error::RunError;
use crate::io::config::{DiagnoseConfig, ReportMode};
use crate::io::model::{ChatModel, ChatRequest};
use crate::io::prompt::{DispatchContext, PromptEngine};
use crate::playbook::{Playbook, Record, Step};
use crate::report::ReportCompiler;
use crate::tools::invocation::execute_tool_calls;
use crate::tools::registry::ToolRegistry;

/// Knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_transitions: u32,
    pub report_mode: ReportMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&DiagnoseConfig::default())
    }
}

impl From<&DiagnoseConfig> for RunOptions {
    fn from(cfg: &DiagnoseConfig) -> Self {
        Self {
            max_transitions: cfg.max_transitions,
            report_mode: cfg.report_mode,
        }
    }
}

/// Progress notifications. Observers cannot influence the run.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    StageEntered {
        stage: Stage,
        step_index: usize,
        transition: u32,
    },
    ModelReplied {
        stage: Stage,
        message: &'a ChatMessage,
    },
    ToolsDispatched {
        step_index: usize,
        dispatch: &'a DispatchResults,
    },
    StepConcluded {
        step_index: usize,
        record: &'a Record,
    },
    ReportReady {
        report: &'a str,
    },
}

/// Successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisOutcome {
    pub report: String,
    /// One record per step, in playbook order.
    pub history: Vec<Record>,
    pub transitions: u32,
}

/// Next stage together with the data it consumes.
enum Transition {
    Dispatch,
    DispatchModel(Vec<ChatMessage>),
    Analyze,
    AnalyzeModel(Vec<ChatMessage>),
    Report,
}

impl Transition {
    fn stage(&self) -> Stage {
        match self {
            Self::Dispatch => Stage::Dispatch,
            Self::DispatchModel(_) => Stage::DispatchModel,
            Self::Analyze => Stage::Analyze,
            Self::AnalyzeModel(_) => Stage::AnalyzeModel,
            Self::Report => Stage::Report,
        }
    }
}

/// Run `playbook` to completion against `registry` and `model`.
///
/// Tool failures never abort the run; they are shown to the model on the
/// next dispatch. Model failures and the transition ceiling are fatal.
#[instrument(skip_all, fields(playbook = %playbook.name, steps = playbook.len(), max_transitions = options.max_transitions))]
pub fn run_diagnosis<M: ChatModel, F: FnMut(&RunEvent<'_>)>(
    playbook: &Playbook,
    registry: &ToolRegistry,
    model: &M,
    options: RunOptions,
    on_event: F,
) -> Result<DiagnosisOutcome, RunError> {
    let prompts = PromptEngine::new().map_err(RunError::Prompt)?;
    let mut run = Diagnosis {
        playbook,
        registry,
        model,
        prompts: &prompts,
        state: DiagnosticState::new(playbook),
        on_event,
    };
    run.drive(options)
}

struct Diagnosis<'a, M, F> {
    playbook: &'a Playbook,
    registry: &'a ToolRegistry,
    model: &'a M,
    prompts: &'a PromptEngine,
    state: DiagnosticState,
    on_event: F,
}

impl<M: ChatModel, F: FnMut(&RunEvent<'_>)> Diagnosis<'_, M, F> {
    fn drive(&mut self, options: RunOptions) -> Result<DiagnosisOutcome, RunError> {
        let mut transitions = 0u32;
        let mut next = if self.state.is_finished() {
            Transition::Report
        } else {
            Transition::Dispatch
        };

        loop {
            transitions += 1;
            if transitions > options.max_transitions {
                let pending: Vec<String> = self.state.pending_tools().iter().cloned().collect();
                warn!(
                    step = self.state.current_step(),
                    pending = %pending.join(","),
                    "transition ceiling reached"
                );
                return Err(RunError::RunLimit {
                    limit: options.max_transitions,
                    step_index: self.state.current_step(),
                    pending,
                });
            }
            (self.on_event)(&RunEvent::StageEntered {
                stage: next.stage(),
                step_index: self.state.current_step(),
                transition: transitions,
            });

            next = match next {
                Transition::Dispatch => self.dispatch()?,
                Transition::DispatchModel(messages) => self.dispatch_model(&messages)?,
                Transition::Analyze => self.analyze()?,
                Transition::AnalyzeModel(messages) => self.analyze_model(&messages)?,
                Transition::Report => {
                    let report = ReportCompiler::new(options.report_mode).compile(
                        self.prompts,
                        self.playbook,
                        self.state.history(),
                        self.model,
                    )?;
                    (self.on_event)(&RunEvent::ReportReady { report: &report });
                    info!(transitions, "diagnosis finished");
                    let history = std::mem::take(&mut self.state).into_history();
                    return Ok(DiagnosisOutcome {
                        report,
                        history,
                        transitions,
                    });
                }
            };
        }
    }

    fn current_step(&self) -> Option<&Step> {
        self.playbook.steps.get(self.state.current_step())
    }

    /// Build the dispatch prompt, or skip to analysis when nothing is pending.
    fn dispatch(&mut self) -> Result<Transition, RunError> {
        if self.state.pending_tools().is_empty() {
            debug!(step = self.state.current_step(), "no pending tools");
            return Ok(Transition::Analyze);
        }
        let Some(step) = self.current_step() else {
            return Ok(Transition::Report);
        };
        let messages = self
            .prompts
            .dispatch_messages(&DispatchContext {
                middleware: &self.playbook.middleware,
                step,
                history: self.state.history(),
                pending: self.state.pending_tools(),
                results: self.state.tool_results(),
                errors: self.state.tool_errors(),
            })
            .map_err(RunError::Prompt)?;
        Ok(Transition::DispatchModel(messages))
    }

    #[instrument(skip_all, fields(step = self.state.current_step()))]
    fn dispatch_model(&mut self, messages: &[ChatMessage]) -> Result<Transition, RunError> {
        let tools = match self.current_step() {
            Some(step) => self
                .registry
                .schemas_for(step.tool_list.iter().map(String::as_str)),
            None => Vec::new(),
        };
        let reply = self.call_model(Stage::DispatchModel, messages, &tools)?;

        let dispatch = execute_tool_calls(self.registry, &reply);
        (self.on_event)(&RunEvent::ToolsDispatched {
            step_index: self.state.current_step(),
            dispatch: &dispatch,
        });
        if dispatch.is_empty() {
            debug!("model requested no tools");
        }
        self.state.apply_dispatch(dispatch);

        if self.state.pending_tools().is_empty() {
            Ok(Transition::Analyze)
        } else {
            Ok(Transition::Dispatch)
        }
    }

    fn analyze(&mut self) -> Result<Transition, RunError> {
        let Some(step) = self.current_step() else {
            return Ok(Transition::Report);
        };
        let messages = self
            .prompts
            .analysis_messages(step, self.state.tool_results())
            .map_err(RunError::Prompt)?;
        Ok(Transition::AnalyzeModel(messages))
    }

    #[instrument(skip_all, fields(step = self.state.current_step()))]
    fn analyze_model(&mut self, messages: &[ChatMessage]) -> Result<Transition, RunError> {
        let reply = self.call_model(Stage::AnalyzeModel, messages, &[])?;
        let step_index = self.state.current_step();
        let advance = self.state.record_conclusion(self.playbook, reply.content);
        if let Some(record) = self.state.history().last() {
            (self.on_event)(&RunEvent::StepConcluded { step_index, record });
        }
        info!(step = step_index, "step concluded");
        Ok(match advance {
            StepAdvance::Next => Transition::Dispatch,
            StepAdvance::Finished => Transition::Report,
        })
    }

    fn call_model(
        &mut self,
        stage: Stage,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatMessage, RunError> {
        let reply = self
            .model
            .generate(&ChatRequest {
                stage,
                messages,
                tools,
            })
            .map_err(|source| RunError::Collaborator { stage, source })?;
        (self.on_event)(&RunEvent::ModelReplied {
            stage,
            message: &reply,
        });
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, StaticTool, playbook, step, tool_call};

    fn registry(names: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register(*name, Box::new(StaticTool::ok(name, &format!("{} output", name))));
        }
        registry
    }

    fn call(name: &str) -> ChatMessage {
        ChatMessage::with_tool_calls(vec![tool_call(name, r#"{"node":"n1"}"#)])
    }

    #[test]
    fn step_without_tools_skips_the_dispatch_model_call() {
        let book = playbook(vec![step("only", &[])]);
        let model = ScriptedModel::new(vec![ChatMessage::assistant("all good")]);
        let mut stages = Vec::new();

        let outcome = run_diagnosis(&book, &registry(&[]), &model, RunOptions::default(), |event| {
            if let RunEvent::StageEntered { stage, .. } = event {
                stages.push(*stage);
            }
        })
        .expect("run");

        assert_eq!(
            stages,
            vec![
                Stage::Dispatch,
                Stage::Analyze,
                Stage::AnalyzeModel,
                Stage::Report
            ]
        );
        assert_eq!(model.calls(), 1);
        assert_eq!(outcome.history[0].conclusion, "all good");
        assert_eq!(outcome.transitions, 4);
    }

    #[test]
    fn dispatch_offers_only_registered_step_tools() {
        let book = playbook(vec![step("s", &["a", "ghost"])]);
        let model = ScriptedModel::new(vec![
            ChatMessage::with_tool_calls(vec![
                tool_call("a", "{}"),
                tool_call("ghost", "{}"),
            ]),
        ]);
        let err = run_diagnosis(
            &book,
            &registry(&["a", "other"]),
            &model,
            RunOptions {
                max_transitions: 3,
                ..RunOptions::default()
            },
            |_| {},
        )
        .unwrap_err();

        assert!(matches!(err, RunError::RunLimit { ref pending, .. } if pending == &["ghost"]));
        assert_eq!(model.requests()[0].tool_names, vec!["a"]);
    }

    #[test]
    fn errors_are_shown_on_the_next_dispatch() {
        let book = playbook(vec![step("s", &["a"])]);
        let model = ScriptedModel::new(vec![
            call("missing"),
            call("a"),
            ChatMessage::assistant("done"),
        ]);
        let outcome =
            run_diagnosis(&book, &registry(&["a"]), &model, RunOptions::default(), |_| {})
                .expect("run");
        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert!(!requests[0].messages[1].content.contains("tool not found"));
        assert!(requests[1].messages[1].content.contains("tool not found"));
        assert!(requests[2].messages[0].content.contains("a output"));
        assert_eq!(requests[2].stage, Stage::AnalyzeModel);
        assert!(requests[2].tool_names.is_empty());
        assert_eq!(outcome.history.len(), 1);
    }

    #[test]
    fn model_failure_is_fatal_and_tagged_with_stage() {
        let book = playbook(vec![step("s", &["a"])]);
        let model = ScriptedModel::new(Vec::new());
        let err = run_diagnosis(&book, &registry(&["a"]), &model, RunOptions::default(), |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Collaborator {
                stage: Stage::DispatchModel,
                ..
            }
        ));
    }

    #[test]
    fn events_report_each_concluded_step() {
        let book = playbook(vec![step("a", &[]), step("b", &[])]);
        let model = ScriptedModel::repeating(ChatMessage::assistant("ok"));
        let mut concluded = Vec::new();
        let mut report_seen = false;
        run_diagnosis(&book, &registry(&[]), &model, RunOptions::default(), |event| match event {
            RunEvent::StepConcluded { step_index, record } => {
                concluded.push((*step_index, record.details.clone()));
            }
            RunEvent::ReportReady { .. } => report_seen = true,
            _ => {}
        })
        .expect("run");
        assert_eq!(
            concluded,
            vec![(0, "a details".to_string()), (1, "b details".to_string())]
        );
        assert!(report_seen);
    }
}
