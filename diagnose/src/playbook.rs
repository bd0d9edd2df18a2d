use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// One unit of diagnosis: instructions plus the tools expected to inform it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    /// Free-text diagnostic instructions.
    pub details: String,
    #[serde(default, alias = "tools")]
    pub tool_list: Vec<String>,
}

/// An ordered diagnosis plan. Read-only once a run starts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playbook {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub task_goal: String,
    /// Middleware or category label copied into prompts.
    #[serde(default, alias = "middle")]
    pub middleware: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Playbook {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Numbered plain-text outline of the plan.
    pub fn outline(&self) -> String {
        if self.steps.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        let _ = writeln!(out, "Playbook: {}", self.name);
        let _ = writeln!(out, "Goal: {}", self.task_goal);
        for (index, step) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "Step {}: {}\n {}\n", index + 1, step.name, step.details);
        }
        out
    }
}

/// Conclusion recorded for a completed step. Never mutated after append.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub details: String,
    pub conclusion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_field_names() {
        let raw = r#"{"name":"redis","middle":"redis","steps":[{"name":"s1","details":"check memory","tools":["info"]}]}"#;
        let playbook: Playbook = serde_json::from_str(raw).expect("parse");
        assert_eq!(playbook.middleware, "redis");
        assert_eq!(playbook.steps[0].tool_list, vec!["info".to_string()]);
        assert_eq!(playbook.id, 0);
    }

    #[test]
    fn outline_numbers_steps() {
        let playbook = Playbook {
            name: "disk".to_string(),
            task_goal: "find full disks".to_string(),
            steps: vec![
                Step {
                    name: "usage".to_string(),
                    details: "run df".to_string(),
                    tool_list: vec!["df".to_string()],
                },
                Step {
                    name: "inodes".to_string(),
                    details: "run df -i".to_string(),
                    tool_list: Vec::new(),
                },
            ],
            ..Playbook::default()
        };
        let outline = playbook.outline();
        assert!(outline.starts_with("Playbook: disk\nGoal: find full disks\n"));
        assert!(outline.contains("Step 1: usage\n run df"));
        assert!(outline.contains("Step 2: inodes"));
    }

    #[test]
    fn outline_of_empty_playbook_is_empty() {
        assert_eq!(Playbook::default().outline(), "");
    }
}
