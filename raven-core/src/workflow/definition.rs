//! Workflow graph shapes: the closed transition-event set, a step's
//! transitions map, and the named graph they compose into (§3
//! WorkflowDefinition, §4.5).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RavenError, RavenResult};

/// Reserved terminal pseudo-step names. Neither is registered with a
/// handler; reaching either ends the run.
pub const DONE_STEP: &str = "__done__";
pub const FAILED_STEP: &str = "__failed__";

pub fn is_terminal_step(name: &str) -> bool {
    name == DONE_STEP || name == FAILED_STEP
}

/// The closed set of transition labels a step handler may return
/// (§3: "Transition events (closed set)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEvent {
    Success,
    Failure,
    Blocked,
    RateLimited,
    NeedsHuman,
    Partial,
}

impl TransitionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionEvent::Success => "success",
            TransitionEvent::Failure => "failure",
            TransitionEvent::Blocked => "blocked",
            TransitionEvent::RateLimited => "rate_limited",
            TransitionEvent::NeedsHuman => "needs_human",
            TransitionEvent::Partial => "partial",
        }
    }
}

impl std::fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One node in the workflow graph.
#[derive(Debug, Clone)]
pub struct StepDef {
    pub name: String,
    pub transitions: HashMap<TransitionEvent, String>,
}

impl StepDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transitions: HashMap::new(),
        }
    }

    pub fn on(mut self, event: TransitionEvent, next_step: impl Into<String>) -> Self {
        self.transitions.insert(event, next_step.into());
        self
    }
}

/// A named graph of steps (§3 WorkflowDefinition).
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub initial_step: String,
    steps: HashMap<String, StepDef>,
}

impl WorkflowDefinition {
    /// Build a definition from a step list. Rejects duplicate step names
    /// at construction time (§4.5 validator: "duplicate step names").
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        initial_step: impl Into<String>,
        steps: Vec<StepDef>,
    ) -> RavenResult<Self> {
        let mut map = HashMap::with_capacity(steps.len());
        for step in steps {
            let name = step.name.clone();
            if map.insert(name.clone(), step).is_some() {
                return Err(RavenError::InvalidInput(format!(
                    "duplicate step name in workflow definition: {name}"
                )));
            }
        }
        let initial_step = initial_step.into();
        if !map.contains_key(&initial_step) {
            return Err(RavenError::InvalidInput(format!(
                "initial_step '{initial_step}' is not a defined step"
            )));
        }
        Ok(Self {
            name: name.into(),
            description: description.into(),
            initial_step,
            steps: map,
        })
    }

    pub fn step(&self, name: &str) -> Option<&StepDef> {
        self.steps.get(name)
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(|s| s.as_str())
    }

    pub fn steps(&self) -> &HashMap<String, StepDef> {
        &self.steps
    }

    /// Resolve the next step for `current` given the `event` it
    /// returned. Unmatched event for a non-terminal step is treated as
    /// `failure` (§4.5 step 3); if that fallback is also unmapped, the
    /// run falls to `__failed__`.
    pub fn resolve_transition(&self, current: &str, event: TransitionEvent) -> String {
        let Some(step) = self.steps.get(current) else {
            return FAILED_STEP.to_string();
        };
        if let Some(next) = step.transitions.get(&event) {
            return next.clone();
        }
        step.transitions
            .get(&TransitionEvent::Failure)
            .cloned()
            .unwrap_or_else(|| FAILED_STEP.to_string())
    }
}
