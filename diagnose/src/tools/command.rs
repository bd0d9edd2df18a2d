//! Templated command tool, executed locally or on the target node.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::auth::{AuthConfig, AuthPolicy};
use crate::core::types::{NODE_PARAM, ParameterSchema, ToolSchema};
use crate::error::{ConfigError, ToolError};
use crate::io::process::{CommandOutput, run_shell};
use crate::io::ssh::{RemoteTarget, run_remote};
use crate::io::tool_config::{ExecTemplate, ToolFamily};
use crate::tools::Tool;
use crate::tools::template::render_command;

/// Where a rendered command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// `/bin/sh -c` on this machine.
    Local,
    /// Over ssh on the node named by the `node` argument.
    Remote,
}

#[derive(Debug, Clone)]
pub struct CommandTool {
    mode: ExecMode,
    template: ExecTemplate,
    auth: AuthConfig,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandTool {
    pub fn new(
        mode: ExecMode,
        family: &ToolFamily,
        template_name: &str,
        output_limit_bytes: usize,
    ) -> Result<Self, ConfigError> {
        let template = family
            .template(template_name)
            .ok_or_else(|| ConfigError::UnknownTemplate {
                family: family.tool_name.clone(),
                template: template_name.to_string(),
            })?;
        Ok(Self {
            mode,
            timeout: family.timeout_for(template),
            template: template.clone(),
            auth: family.auth_config.clone().unwrap_or_default(),
            output_limit_bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    fn node_parameter(&self) -> ParameterSchema {
        let description = match self.auth.policy {
            AuthPolicy::None => "Target node: host name or IP address.".to_string(),
            AuthPolicy::Global => {
                "Target node: host name or IP address (shared credentials).".to_string()
            }
            AuthPolicy::PerNode => {
                let known: Vec<&str> = self.auth.node_auths.keys().map(String::as_str).collect();
                format!("Target node, one of the configured nodes: {}.", known.join(", "))
            }
        };
        ParameterSchema {
            name: NODE_PARAM.to_string(),
            description,
            required: true,
            allowed: Vec::new(),
        }
    }

    /// Parse and check arguments, then render the command. Returns `(node, command)`.
    fn prepare(&self, arguments: &str) -> Result<(String, String), ToolError> {
        let mut args = parse_arguments(arguments)?;

        let node = match args.get(NODE_PARAM) {
            Some(Value::String(node)) if !node.trim().is_empty() => node.trim().to_string(),
            _ => {
                return Err(ToolError::Argument(format!(
                    "missing required parameter '{}'",
                    NODE_PARAM
                )));
            }
        };

        for param in &self.template.parameters {
            match args.get(&param.name) {
                Some(value) => check_allowed(param, value)?,
                None if !param.required => {
                    args.insert(param.name.clone(), Value::String(String::new()));
                }
                None => {}
            }
        }

        let command = render_command(&self.template.name, &self.template.exec, &args)?;
        Ok((node, command))
    }

    fn execute(&self, node: &str, command: &str) -> Result<CommandOutput, ToolError> {
        let credentials = self.auth.resolve(node)?;
        let outcome = match self.mode {
            ExecMode::Local => run_shell(command, self.timeout, self.output_limit_bytes),
            ExecMode::Remote => {
                let target = RemoteTarget {
                    node,
                    credentials: credentials.as_ref(),
                };
                run_remote(&target, command, self.timeout, self.output_limit_bytes)
            }
        };
        outcome.map_err(|err| ToolError::Execution(format!("{:#}", err)))
    }
}

impl Tool for CommandTool {
    fn describe(&self) -> ToolSchema {
        let mut parameters: Vec<ParameterSchema> = self
            .template
            .parameters
            .iter()
            .filter(|param| param.name != NODE_PARAM)
            .cloned()
            .collect();
        parameters.push(self.node_parameter());
        ToolSchema {
            name: self.template.name.clone(),
            description: self.template.description.clone(),
            parameters,
        }
    }

    #[instrument(skip_all, fields(tool = %self.template.name, mode = ?self.mode))]
    fn invoke(&self, arguments: &str) -> Result<String, ToolError> {
        let (node, command) = self.prepare(arguments)?;
        debug!(node = %node, "executing command template");
        let output = self.execute(&node, &command)?;
        interpret_output(output, self.timeout)
    }
}

fn parse_arguments(raw: &str) -> Result<BTreeMap<String, Value>, ToolError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ToolError::Argument(format!("arguments are not valid JSON: {}", err)))?;
    let Value::Object(map) = value else {
        return Err(ToolError::Argument(
            "arguments must be a JSON object".to_string(),
        ));
    };

    let mut args = BTreeMap::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                args.insert(key, value);
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(ToolError::Argument(format!(
                    "parameter '{}' must be a string, number or boolean",
                    key
                )));
            }
        }
    }
    Ok(args)
}

fn check_allowed(param: &ParameterSchema, value: &Value) -> Result<(), ToolError> {
    if param.allowed.is_empty() {
        return Ok(());
    }
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if param.allowed.iter().any(|allowed| *allowed == text) {
        return Ok(());
    }
    Err(ToolError::Argument(format!(
        "parameter '{}' must be one of [{}], got '{}'",
        param.name,
        param.allowed.join(", "),
        text
    )))
}

/// Non-empty stderr fails the call even when the exit status is zero.
fn interpret_output(output: CommandOutput, timeout: Duration) -> Result<String, ToolError> {
    if output.timed_out {
        return Err(ToolError::Execution(format!(
            "command timed out after {}s",
            timeout.as_secs()
        )));
    }
    let stderr = output.stderr_text();
    if !stderr.is_empty() {
        warn!(exit_code = ?output.exit_code, "command wrote to stderr");
        return Err(ToolError::Execution(stderr));
    }
    match output.exit_code {
        Some(0) => Ok(output.stdout_text()),
        Some(code) => Err(ToolError::Execution(format!(
            "command exited with status {}",
            code
        ))),
        None => Err(ToolError::Execution(
            "command terminated by signal".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::json;

    use super::*;

    fn family(exec: &str, parameters: Vec<ParameterSchema>) -> ToolFamily {
        ToolFamily {
            tool_name: "local".to_string(),
            timeout: Some(5),
            exec_templates: vec![ExecTemplate {
                name: "probe".to_string(),
                description: "probe the host".to_string(),
                exec: exec.to_string(),
                timeout: None,
                parameters,
            }],
            ..ToolFamily::default()
        }
    }

    fn param(name: &str, required: bool, allowed: &[&str]) -> ParameterSchema {
        ParameterSchema {
            name: name.to_string(),
            description: String::new(),
            required,
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn local(exec: &str, parameters: Vec<ParameterSchema>) -> CommandTool {
        CommandTool::new(ExecMode::Local, &family(exec, parameters), "probe", 10_000)
            .expect("tool")
    }

    #[test]
    fn unknown_template_is_a_config_error() {
        let err = CommandTool::new(ExecMode::Local, &family("true", vec![]), "nope", 10)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTemplate { template, .. } if template == "nope"));
    }

    #[test]
    fn describe_appends_required_node_parameter() {
        let schema = local("echo {{ word }}", vec![param("word", true, &[])]).describe();
        assert_eq!(schema.name, "probe");
        let node = schema.parameter(NODE_PARAM).expect("node");
        assert!(node.required);
        assert_eq!(schema.parameters.len(), 2);
    }

    #[test]
    fn missing_node_is_an_argument_error() {
        let tool = local("echo hi", vec![]);
        for raw in [r#"{}"#, r#"{"node": ""}"#, r#"{"node": 3}"#] {
            let err = tool.invoke(raw).unwrap_err();
            assert!(matches!(err, ToolError::Argument(_)), "{raw}");
        }
    }

    #[test]
    fn malformed_arguments_are_argument_errors() {
        let tool = local("echo hi", vec![]);
        assert!(matches!(tool.invoke("not json"), Err(ToolError::Argument(_))));
        assert!(matches!(tool.invoke("[1]"), Err(ToolError::Argument(_))));
        assert!(matches!(
            tool.invoke(r#"{"node":"n","x":[1]}"#),
            Err(ToolError::Argument(_))
        ));
    }

    #[test]
    fn enum_violation_is_an_argument_error() {
        let tool = local("echo {{ unit }}", vec![param("unit", true, &["h", "k"])]);
        let err = tool.invoke(r#"{"node":"n","unit":"g"}"#).unwrap_err();
        assert!(matches!(err, ToolError::Argument(msg) if msg.contains("unit")));
    }

    #[test]
    fn missing_required_parameter_is_a_template_error() {
        let tool = local("echo {{ word }}", vec![param("word", true, &[])]);
        let err = tool.invoke(r#"{"node":"n"}"#).unwrap_err();
        assert!(matches!(err, ToolError::Template(_)));
    }

    #[test]
    fn omitted_optional_parameter_renders_empty() {
        let tool = local("echo a{{ suffix }}b", vec![param("suffix", false, &[])]);
        assert_eq!(tool.invoke(r#"{"node":"n"}"#).expect("invoke"), "ab\n");
    }

    #[test]
    fn per_node_policy_rejects_unknown_node_before_executing() {
        let mut fam = family("echo hi", vec![]);
        fam.auth_config = Some(AuthConfig {
            policy: AuthPolicy::PerNode,
            ..AuthConfig::default()
        });
        let tool = CommandTool::new(ExecMode::Remote, &fam, "probe", 10).expect("tool");
        let err = tool.invoke(r#"{"node":"ghost"}"#).unwrap_err();
        assert!(matches!(err, ToolError::Auth(msg) if msg.contains("ghost")));
    }

    #[test]
    fn stderr_output_is_an_execution_error() {
        let tool = local("echo x 1>&2", vec![]);
        let err = tool.invoke(r#"{"node":"n"}"#).unwrap_err();
        assert_eq!(err, ToolError::Execution("x\n".to_string()));
    }

    #[test]
    fn silent_non_zero_exit_is_an_execution_error() {
        let tool = local("exit 4", vec![]);
        let err = tool.invoke(r#"{"node":"n"}"#).unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution("command exited with status 4".to_string())
        );
    }

    #[test]
    fn timeout_is_an_execution_error_and_bounds_the_call() {
        let mut fam = family("sleep 6; echo done", vec![]);
        fam.timeout = Some(1);
        let tool = CommandTool::new(ExecMode::Local, &fam, "probe", 10).expect("tool");
        let started = Instant::now();
        let err = tool.invoke(r#"{"node":"n"}"#).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
        assert_eq!(
            err,
            ToolError::Execution("command timed out after 1s".to_string())
        );
    }

    #[test]
    fn shell_length_expansion_runs() {
        let tool = local("X={{ word }}; echo ${#X}", vec![param("word", true, &[])]);
        let out = tool.invoke(r#"{"node":"n","word":"abc"}"#).expect("invoke");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn minimal_arguments_from_describe_execute() {
        let tool = local(
            "echo {{ unit }}-{{ path }}-{{ node }}",
            vec![param("unit", true, &["h", "k"]), param("path", true, &[])],
        );
        let args = tool.describe().minimal_arguments("n1");
        let raw = serde_json::to_string(&args).expect("encode");
        assert_eq!(tool.invoke(&raw).expect("invoke"), "h-value-n1\n");
        assert_eq!(args[NODE_PARAM], json!("n1"));
    }
}
