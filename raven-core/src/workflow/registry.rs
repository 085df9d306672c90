//! Per-run handler registry (§4.5, §9: "avoid process-wide mutable
//! singletons" — a fresh registry is built for every run rather than
//! registered once at process start).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RavenError, RavenResult};

use super::definition::TransitionEvent;

/// Everything a step handler needs to do its work and report back a
/// transition event.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub step: String,
    pub metadata: HashMap<String, Value>,
    pub cancel: CancellationToken,
}

/// The function invoked for a step (§4.5: "Handler").
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Perform the step's work, returning the transition event to
    /// follow. An `Err` becomes a `failure` event with the error message
    /// recorded in the step's history entry (§4.5 step 2/3).
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent>;

    /// Non-side-effecting description used by [`super::engine::WorkflowEngine::dry_run`].
    async fn dry_run(&self, ctx: &StepContext) -> String {
        format!("step '{}' (dry run, no side effects)", ctx.step)
    }
}

/// name → handler map for one workflow run.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. Panics on a duplicate
    /// registration — a programming error, not a runtime condition
    /// (§4.5: "`register` is panic-on-duplicate").
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            panic!("handler '{name}' registered twice on the same registry");
        }
    }

    pub fn get(&self, name: &str) -> RavenResult<Arc<dyn StepHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| RavenError::NotFound(format!("no handler registered for step '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}
