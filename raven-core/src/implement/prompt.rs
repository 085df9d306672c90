//! Safe prompt substitution (§4.6 step 4, §9 "templating delimiter
//! collisions").
//!
//! Task-spec text and agent output may themselves contain `{{...}}` or
//! other templating-engine delimiters, so the prompt builder must not
//! hand the spec text to a general templating engine that would rescan
//! it. Instead this is a single left-to-right pass over the template
//! string: `[[PLACEHOLDER]]` tokens from a closed enumerated set are
//! replaced with their value, and the value is never rescanned for
//! further placeholders — a `[[TASK_ID]]` literal embedded inside a
//! task's own spec text survives untouched in the rendered output.

use std::collections::HashMap;

/// Placeholders the prompt builder recognizes (§4.6 step 4).
pub const PLACEHOLDER_TASK_SPEC: &str = "TASK_SPEC";
pub const PLACEHOLDER_TASK_ID: &str = "TASK_ID";
pub const PLACEHOLDER_TASK_TITLE: &str = "TASK_TITLE";
pub const PLACEHOLDER_PHASE_ID: &str = "PHASE_ID";
pub const PLACEHOLDER_PHASE_NAME: &str = "PHASE_NAME";
pub const PLACEHOLDER_PHASE_RANGE: &str = "PHASE_RANGE";
pub const PLACEHOLDER_PROJECT_NAME: &str = "PROJECT_NAME";
pub const PLACEHOLDER_PROJECT_LANGUAGE: &str = "PROJECT_LANGUAGE";
pub const PLACEHOLDER_VERIFICATION_LIST: &str = "VERIFICATION_LIST";
pub const PLACEHOLDER_VERIFICATION_JOINED: &str = "VERIFICATION_JOINED";
pub const PLACEHOLDER_COMPLETED_TASK_IDS: &str = "COMPLETED_TASK_IDS";
pub const PLACEHOLDER_REMAINING_TASK_IDS: &str = "REMAINING_TASK_IDS";
pub const PLACEHOLDER_AGENT_NAME: &str = "AGENT_NAME";
pub const PLACEHOLDER_MODEL: &str = "MODEL";

/// The built-in prompt template shipped when a project has not
/// configured `[agents.<name>] prompt_template`.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"# Task [[TASK_ID]]: [[TASK_TITLE]]

Project: [[PROJECT_NAME]] ([[PROJECT_LANGUAGE]])
Phase [[PHASE_ID]] ([[PHASE_NAME]], [[PHASE_RANGE]])
Agent: [[AGENT_NAME]] (model: [[MODEL]])

## Task Specification

[[TASK_SPEC]]

## Verification

Run the following before declaring the task done:

[[VERIFICATION_LIST]]

Or, as a single command: `[[VERIFICATION_JOINED]]`

## Progress

Completed so far: [[COMPLETED_TASK_IDS]]
Still remaining: [[REMAINING_TASK_IDS]]

When every task in this phase is complete, emit the literal token
`PHASE_COMPLETE`. If this task cannot proceed, emit `TASK_BLOCKED` with a
one-line reason. If you hit an unrecoverable problem, emit `RAVEN_ERROR`
with a one-line reason.
"#;

#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub task_spec: String,
    pub task_id: String,
    pub task_title: String,
    pub phase_id: i64,
    pub phase_name: String,
    pub phase_range: String,
    pub project_name: String,
    pub project_language: String,
    pub verification_commands: Vec<String>,
    pub completed_task_ids: Vec<String>,
    pub remaining_task_ids: Vec<String>,
    pub agent_name: String,
    pub model: String,
}

fn join_or(items: &[String], sep: &str, empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(sep)
    }
}

impl PromptContext {
    fn values(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert(PLACEHOLDER_TASK_SPEC, self.task_spec.clone());
        map.insert(PLACEHOLDER_TASK_ID, self.task_id.clone());
        map.insert(PLACEHOLDER_TASK_TITLE, self.task_title.clone());
        map.insert(PLACEHOLDER_PHASE_ID, self.phase_id.to_string());
        map.insert(PLACEHOLDER_PHASE_NAME, self.phase_name.clone());
        map.insert(PLACEHOLDER_PHASE_RANGE, self.phase_range.clone());
        map.insert(PLACEHOLDER_PROJECT_NAME, self.project_name.clone());
        map.insert(PLACEHOLDER_PROJECT_LANGUAGE, self.project_language.clone());
        map.insert(
            PLACEHOLDER_VERIFICATION_LIST,
            if self.verification_commands.is_empty() {
                "(none configured)".to_string()
            } else {
                self.verification_commands
                    .iter()
                    .map(|c| format!("- `{c}`"))
                    .collect::<Vec<_>>()
                    .join("\n")
            },
        );
        map.insert(
            PLACEHOLDER_VERIFICATION_JOINED,
            self.verification_commands.join(" && "),
        );
        map.insert(
            PLACEHOLDER_COMPLETED_TASK_IDS,
            join_or(&self.completed_task_ids, ", ", "(none)"),
        );
        map.insert(
            PLACEHOLDER_REMAINING_TASK_IDS,
            join_or(&self.remaining_task_ids, ", ", "(none)"),
        );
        map.insert(PLACEHOLDER_AGENT_NAME, self.agent_name.clone());
        map.insert(PLACEHOLDER_MODEL, self.model.clone());
        map
    }
}

/// Render `template`, substituting every `[[PLACEHOLDER]]` token with its
/// value in a single left-to-right pass. Unknown `[[...]]` tokens are
/// left verbatim (they are not part of the closed placeholder set).
pub fn render_prompt(template: &str, ctx: &PromptContext) -> String {
    let values = ctx.values();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("[[") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("]]") {
            Some(close) => {
                let token = &after_open[..close];
                match values.get(token) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("[[");
                        out.push_str(token);
                        out.push_str("]]");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                out.push_str("[[");
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ctx() -> PromptContext {
        PromptContext {
            task_spec: "do the thing".into(),
            task_id: "T-007".into(),
            task_title: "Add auth".into(),
            phase_id: 2,
            phase_name: "Core".into(),
            phase_range: "T-006..T-010".into(),
            project_name: "raven".into(),
            project_language: "rust".into(),
            verification_commands: vec!["cargo test".into()],
            completed_task_ids: vec!["T-006".into()],
            remaining_task_ids: vec!["T-008".into()],
            agent_name: "claude".into(),
            model: "default".into(),
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let rendered = render_prompt(DEFAULT_PROMPT_TEMPLATE, &sample_ctx());
        assert!(rendered.contains("Task T-007: Add auth"));
        assert!(rendered.contains("do the thing"));
        assert!(rendered.contains("cargo test"));
    }

    #[test]
    fn templating_delimiters_inside_task_spec_survive_unchanged() {
        let mut ctx = sample_ctx();
        ctx.task_spec = "use [[TASK_ID]] and {{jinja}} literally".into();
        let rendered = render_prompt("[[TASK_SPEC]]", &ctx);
        assert_eq!(rendered, "use [[TASK_ID]] and {{jinja}} literally");
    }

    #[test]
    fn unknown_placeholder_left_verbatim() {
        let rendered = render_prompt("[[NOT_A_REAL_PLACEHOLDER]]", &sample_ctx());
        assert_eq!(rendered, "[[NOT_A_REAL_PLACEHOLDER]]");
    }

    #[test]
    fn empty_progress_lists_render_as_none() {
        let mut ctx = sample_ctx();
        ctx.completed_task_ids.clear();
        ctx.remaining_task_ids.clear();
        let rendered = render_prompt("[[COMPLETED_TASK_IDS]]|[[REMAINING_TASK_IDS]]", &ctx);
        assert_eq!(rendered, "(none)|(none)");
    }
}
