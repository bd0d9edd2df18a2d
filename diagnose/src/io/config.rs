//! Run configuration stored as TOML (`diagnose.toml` by default).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;

pub const DEFAULT_CONFIG_FILE: &str = "diagnose.toml";

/// How the final report is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Render the history directly.
    #[default]
    Template,
    /// Hand the rendered history to the model for a summary.
    Model,
}

/// Run configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnoseConfig {
    /// Hard ceiling on stage transitions in one run.
    pub max_transitions: u32,

    pub report_mode: ReportMode,

    /// Truncate captured tool stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub model: ModelConfig,
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key. Never the key itself.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for DiagnoseConfig {
    fn default() -> Self {
        Self {
            max_transitions: 200,
            report_mode: ReportMode::Template,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            model: ModelConfig::default(),
        }
    }
}

impl DiagnoseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_transitions == 0 {
            return Err(anyhow!("max_transitions must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must be non-empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DiagnoseConfig::default()`.
pub fn load_config(path: &Path) -> Result<DiagnoseConfig> {
    if !path.exists() {
        let cfg = DiagnoseConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DiagnoseConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Write via a sibling temp file and rename, creating parent directories.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
