//! Playbook-driven infrastructure diagnosis.
//!
//! Loads a playbook and a tool configuration, lets the model collaborator
//! walk the steps, and prints the final report to stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use diagnose::core::invariants::validate_playbook;
use diagnose::diagnosis::{RunEvent, RunOptions, run_diagnosis};
use diagnose::error::RunError;
use diagnose::exit_codes;
use diagnose::io::config::{DEFAULT_CONFIG_FILE, DiagnoseConfig, load_config};
use diagnose::io::model::OpenAiChatModel;
use diagnose::io::playbook_store::{load_playbook, read_playbook};
use diagnose::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;
use diagnose::io::run_log::write_run_artifacts;
use diagnose::logging;
use diagnose::playbook::Playbook;
use diagnose::tools::registry::ToolRegistry;

#[derive(Parser)]
#[command(
    name = "diagnose",
    version,
    about = "Playbook-driven infrastructure diagnosis"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a playbook against the configured tools and print the report.
    Run {
        #[arg(long)]
        playbook: PathBuf,
        /// Tool configuration (.yaml, .yml or .json).
        #[arg(long)]
        tools: PathBuf,
        /// Run configuration (TOML). Defaults apply when the file is missing.
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Also write report.md and history.json here.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Print stage transitions to stderr.
        #[arg(short, long)]
        progress: bool,
    },
    /// Check a playbook (and optionally a tool configuration) without running it.
    Validate {
        #[arg(long)]
        playbook: PathBuf,
        #[arg(long)]
        tools: Option<PathBuf>,
    },
    /// Print the schemas of every configured tool as JSON.
    Tools {
        #[arg(long)]
        tools: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            playbook,
            tools,
            config,
            out_dir,
            progress,
        } => cmd_run(&playbook, &tools, &config, out_dir.as_deref(), progress),
        Command::Validate { playbook, tools } => {
            report_invalid(cmd_validate(&playbook, tools.as_deref()))
        }
        Command::Tools { tools } => report_invalid(cmd_tools(&tools)),
    };
    std::process::exit(code);
}

fn report_invalid(result: Result<()>) -> i32 {
    match result {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    }
}

fn load_registry(path: &Path, output_limit_bytes: usize) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::with_output_limit(output_limit_bytes);
    registry
        .load(path)
        .with_context(|| format!("load tools {}", path.display()))?;
    Ok(registry)
}

fn prepare_run(
    playbook_path: &Path,
    tools_path: &Path,
    config_path: &Path,
) -> Result<(DiagnoseConfig, Playbook, ToolRegistry, OpenAiChatModel)> {
    let cfg = load_config(config_path)?;
    let playbook = load_playbook(playbook_path)?;
    let registry = load_registry(tools_path, cfg.output_limit_bytes)?;
    let model = OpenAiChatModel::from_config(&cfg.model)?;
    Ok((cfg, playbook, registry, model))
}

fn cmd_run(
    playbook_path: &Path,
    tools_path: &Path,
    config_path: &Path,
    out_dir: Option<&Path>,
    progress: bool,
) -> i32 {
    let (cfg, playbook, registry, model) = match prepare_run(playbook_path, tools_path, config_path) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("{:#}", err);
            return exit_codes::INVALID;
        }
    };

    let outcome = run_diagnosis(
        &playbook,
        &registry,
        &model,
        RunOptions::from(&cfg),
        |event| {
            if !progress {
                return;
            }
            match event {
                RunEvent::StageEntered {
                    stage,
                    step_index,
                    transition,
                } => eprintln!("[{transition}] step {} {stage}", step_index + 1),
                RunEvent::ToolsDispatched { dispatch, .. } => {
                    for (name, message) in &dispatch.errors {
                        eprintln!("    tool {name} failed: {message}");
                    }
                }
                _ => {}
            }
        },
    );

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("{}", err);
            return match err {
                RunError::RunLimit { .. } => exit_codes::RUN_LIMIT,
                RunError::Collaborator { .. } | RunError::Prompt(_) => exit_codes::RUN_FAILED,
            };
        }
    };

    print!("{}", outcome.report);
    if let Some(dir) = out_dir {
        match write_run_artifacts(dir, &outcome) {
            Ok(artifacts) => eprintln!("wrote {}", artifacts.report_path.display()),
            Err(err) => {
                eprintln!("{:#}", err);
                return exit_codes::RUN_FAILED;
            }
        }
    }
    exit_codes::OK
}

fn cmd_validate(playbook_path: &Path, tools_path: Option<&Path>) -> Result<()> {
    let playbook = read_playbook(playbook_path)?;
    let errors = validate_playbook(&playbook);
    if !errors.is_empty() {
        anyhow::bail!("invariant violations:\n- {}", errors.join("\n- "));
    }

    if let Some(tools_path) = tools_path {
        let registry = load_registry(tools_path, DEFAULT_OUTPUT_LIMIT_BYTES)?;
        for (index, step) in playbook.steps.iter().enumerate() {
            for name in &step.tool_list {
                if registry.lookup(name).is_none() {
                    eprintln!(
                        "warning: step {} ({}) lists unregistered tool '{}'",
                        index + 1,
                        step.name,
                        name
                    );
                }
            }
        }
    }

    print!("{}", playbook.outline());
    Ok(())
}

fn cmd_tools(tools_path: &Path) -> Result<()> {
    let registry = load_registry(tools_path, DEFAULT_OUTPUT_LIMIT_BYTES)?;
    let schemas: Vec<Value> = registry
        .schemas()
        .iter()
        .map(|schema| {
            json!({
                "name": schema.name,
                "description": schema.description,
                "parameters": schema.to_json_schema(),
            })
        })
        .collect();
    let mut out = serde_json::to_string_pretty(&schemas).context("serialize tool schemas")?;
    out.push('\n');
    print!("{}", out);
    Ok(())
}
