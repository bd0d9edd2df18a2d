//! Command template rendering.
//!
//! Templates use minijinja placeholders (`{{ name }}`). The older `{{.name}}`
//! spelling is rewritten before parsing. Undefined names are errors, so a
//! missing required argument never renders as an empty string.
//!
//! Only `{{ }}` is markup. Block and comment delimiters are moved out of the
//! way, so shell text such as `${#VAR}` or `{%` passes through untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior, Value as TemplateValue};
use regex::Regex;
use serde_json::Value;

use crate::error::ToolError;

static DOTTED_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap()
});

/// Rewrite `{{.name}}` placeholders to `{{ name }}`.
pub fn normalize_placeholders(source: &str) -> String {
    DOTTED_PLACEHOLDER
        .replace_all(source, "{{ $1 }}")
        .into_owned()
}

/// Render `source` with `args`. `name` only labels errors.
pub fn render_command(
    name: &str,
    source: &str,
    args: &BTreeMap<String, Value>,
) -> Result<String, ToolError> {
    let template_error = |err: minijinja::Error| ToolError::Template(format!("{}: {}", name, err));
    let normalized = normalize_placeholders(source);
    let mut env = Environment::new();
    env.set_syntax(command_syntax().map_err(template_error)?);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("quote", shell_quote);
    env.render_str(&normalized, args).map_err(template_error)
}

fn command_syntax() -> Result<SyntaxConfig, minijinja::Error> {
    SyntaxConfig::builder()
        .variable_delimiters("{{", "}}")
        .block_delimiters("{%@", "@%}")
        .comment_delimiters("{#@", "@#}")
        .build()
}

/// Single-quote a value for POSIX shells.
fn shell_quote(value: TemplateValue) -> String {
    let raw = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("'{}'", raw.replace('\'', r"'\''"))
}
