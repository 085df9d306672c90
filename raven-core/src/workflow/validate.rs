//! Graph validator: BFS/DFS from `initial_step` checking the conditions
//! enumerated in §4.5.

use std::collections::{HashSet, VecDeque};

use super::definition::{is_terminal_step, WorkflowDefinition};
use super::registry::HandlerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True iff no `Error`-severity issue was found. Warnings (including
    /// cycles, §4.5) do not make a definition invalid.
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    fn error(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: Severity::Warning,
            message: message.into(),
        });
    }
}

/// Validate `definition` against the rules in §4.5. When `registry` is
/// supplied, also flags transitions that target a registered-handler
/// step whose handler is in fact missing.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    registry: Option<&HandlerRegistry>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Unknown step referenced from transitions; references to
    // non-registered handlers.
    for step in definition.steps().values() {
        for target in step.transitions.values() {
            if !is_terminal_step(target) && definition.step(target).is_none() {
                report.error(format!(
                    "step '{}' transitions to unknown step '{target}'",
                    step.name
                ));
            }
        }
        if let Some(registry) = registry {
            if !registry.contains(&step.name) {
                report.error(format!(
                    "step '{}' has no registered handler",
                    step.name
                ));
            }
        }
        if step.transitions.is_empty() {
            report.error(format!(
                "non-terminal step '{}' has no outgoing transitions",
                step.name
            ));
        }
    }

    // Terminal steps must never be the *source* of a transition — they
    // are not entries in `steps()` at all, so the only way this happens
    // is a step literally named `__done__`/`__failed__` with transitions.
    for name in [super::definition::DONE_STEP, super::definition::FAILED_STEP] {
        if let Some(step) = definition.step(name) {
            if !step.transitions.is_empty() {
                report.error(format!("terminal step '{name}' has outgoing transitions"));
            }
        }
    }

    // Reachability (BFS) and cycle detection (DFS) from initial_step.
    let reachable = bfs_reachable(definition);
    for name in definition.step_names() {
        if !reachable.contains(name) {
            report.warning(format!("step '{name}' is unreachable from the initial step"));
        }
    }

    if let Some(cycle) = find_cycle(definition) {
        report.warning(format!("workflow graph contains a cycle: {}", cycle.join(" -> ")));
    }

    report
}

fn bfs_reachable(definition: &WorkflowDefinition) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(definition.initial_step.clone());
    queue.push_back(definition.initial_step.clone());
    while let Some(current) = queue.pop_front() {
        let Some(step) = definition.step(&current) else {
            continue;
        };
        for target in step.transitions.values() {
            if is_terminal_step(target) {
                continue;
            }
            if seen.insert(target.clone()) {
                queue.push_back(target.clone());
            }
        }
    }
    seen
}

/// DFS cycle detection; returns the cycle's node sequence if one exists.
fn find_cycle(definition: &WorkflowDefinition) -> Option<Vec<String>> {
    #[derive(PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    use std::collections::HashMap;

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut stack: Vec<String> = Vec::new();

    fn visit(
        node: &str,
        definition: &WorkflowDefinition,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::Done) = marks.get(node) {
            return None;
        }
        if matches!(marks.get(node), Some(Mark::Visiting)) {
            let start = stack.iter().position(|s| s == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        marks.insert(node.to_string(), Mark::Visiting);
        stack.push(node.to_string());
        if let Some(step) = definition.step(node) {
            for target in step.transitions.values() {
                if is_terminal_step(target) {
                    continue;
                }
                if let Some(cycle) = visit(target, definition, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    visit(&definition.initial_step, definition, &mut marks, &mut stack)
}

/// Walk the graph for dry-run purposes, annotating cycle-backs.
pub fn dry_run_plan(definition: &WorkflowDefinition) -> Vec<String> {
    let mut lines = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(definition.initial_step.clone());

    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            lines.push(format!("{name}: cycles back to step {name}"));
            continue;
        }
        let Some(step) = definition.step(&name) else {
            continue;
        };
        let mut transitions_desc = Vec::new();
        for (event, target) in &step.transitions {
            transitions_desc.push(format!("{event} -> {target}"));
            if !is_terminal_step(target) && !visited.contains(target) {
                queue.push_back(target.clone());
            }
        }
        transitions_desc.sort();
        lines.push(format!("{name}: [{}]", transitions_desc.join(", ")));
    }
    lines
}
