//! Semantic checks on a playbook before a run starts.

use std::collections::HashSet;

use crate::playbook::Playbook;

/// Check playbook invariants:
/// - Every step has non-blank details
/// - Step names are unique
/// - No step lists the same tool twice
pub fn validate_playbook(playbook: &Playbook) -> Vec<String> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    for (index, step) in playbook.steps.iter().enumerate() {
        let label = format!("steps[{}] '{}'", index, step.name);
        if step.details.trim().is_empty() {
            errors.push(format!("{}: details must not be blank", label));
        }
        if !step.name.is_empty() && !names.insert(step.name.as_str()) {
            errors.push(format!("{}: duplicate step name", label));
        }
        let mut tools = HashSet::new();
        for tool in &step.tool_list {
            if tool.trim().is_empty() {
                errors.push(format!("{}: tool names must not be blank", label));
            } else if !tools.insert(tool.as_str()) {
                errors.push(format!("{}: tool '{}' listed twice", label, tool));
            }
        }
    }

    errors
}
