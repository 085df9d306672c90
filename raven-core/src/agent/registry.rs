//! Per-run adapter registry.
//!
//! §9 design note: avoid process-wide mutable singletons; model shared
//! state as an immutable descriptor plus per-run registry instances
//! passed explicitly into constructors. Built fresh for every CLI
//! invocation rather than registered once at process start.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Agent, ClaudeAdapter, CodexAdapter, StubAdapter};
use crate::config::AgentConfig;

pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Build a registry from resolved `[agents.<name>]` config entries,
    /// falling back to the known built-in adapters for recognized names
    /// and to [`StubAdapter`] otherwise.
    pub fn from_config(configs: &HashMap<String, AgentConfig>) -> Self {
        let mut registry = Self::new();
        for (name, cfg) in configs {
            let agent: Arc<dyn Agent> = match name.as_str() {
                "claude" | "claude-code" => {
                    Arc::new(ClaudeAdapter::new(cfg.command.clone()))
                }
                "codex" | "codex-cli" => Arc::new(CodexAdapter::new(cfg.command.clone())),
                _ => Arc::new(StubAdapter::new(name.clone())),
            };
            registry.register(name.clone(), agent);
        }
        registry
    }

    pub fn register(&mut self, name: String, agent: Arc<dyn Agent>) {
        self.agents.insert(name, agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn Agent> {
        self.get(name)
            .unwrap_or_else(|| Arc::new(StubAdapter::new(name.to_string())))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
