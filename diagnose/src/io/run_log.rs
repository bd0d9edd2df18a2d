//! Run artifacts: the report and the step history, written to an output directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::diagnosis::DiagnosisOutcome;
use crate::io::config::write_atomic;
use crate::playbook::Record;

pub const REPORT_FILE: &str = "report.md";
pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub report_path: PathBuf,
    pub history_path: PathBuf,
}

#[derive(Serialize)]
struct HistoryFile<'a> {
    transitions: u32,
    steps: &'a [Record],
}

/// Write `report.md` and `history.json` under `dir`, each atomically.
pub fn write_run_artifacts(dir: &Path, outcome: &DiagnosisOutcome) -> Result<RunArtifacts> {
    let report_path = dir.join(REPORT_FILE);
    let history_path = dir.join(HISTORY_FILE);

    write_atomic(&report_path, &outcome.report)?;

    let mut history = serde_json::to_string_pretty(&HistoryFile {
        transitions: outcome.transitions,
        steps: &outcome.history,
    })
    .context("serialize history")?;
    history.push('\n');
    write_atomic(&history_path, &history)?;

    Ok(RunArtifacts {
        report_path,
        history_path,
    })
}
