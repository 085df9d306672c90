//! Resolved configuration shapes and precedence rules.
//!
//! TOML parsing and CLI flag definitions are out of scope for this crate
//! (§1 Out-of-scope: "TOML configuration loading; CLI parsing") — those
//! live in the `raven` binary crate. What belongs here is the *shape* of
//! a fully resolved configuration and the env-var-override convention,
//! grounded on `swarm-agents::config::SwarmConfig`
//! (env-var-driven `Default` impl).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `[project]` section of `raven.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub language: String,
    pub tasks_dir: PathBuf,
    pub task_state_file: PathBuf,
    pub phases_conf: PathBuf,
    pub progress_file: PathBuf,
    pub log_dir: PathBuf,
    pub prompt_dir: Option<PathBuf>,
    pub branch_template: String,
    pub verification_commands: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: env_or("RAVEN_PROJECT_NAME", "project"),
            language: env_or("RAVEN_PROJECT_LANGUAGE", "rust"),
            tasks_dir: PathBuf::from(env_or("RAVEN_TASKS_DIR", "tasks")),
            task_state_file: PathBuf::from(env_or("RAVEN_TASK_STATE_FILE", "tasks/task-state.conf")),
            phases_conf: PathBuf::from(env_or("RAVEN_PHASES_CONF", "tasks/phases.conf")),
            progress_file: PathBuf::from(env_or("RAVEN_PROGRESS_FILE", "tasks/PROGRESS.md")),
            log_dir: PathBuf::from(env_or("RAVEN_LOG_DIR", ".raven/logs")),
            prompt_dir: None,
            branch_template: env_or("RAVEN_BRANCH_TEMPLATE", "phase/{id}-{slug}"),
            verification_commands: Vec::new(),
        }
    }
}

/// `[agents.<name>]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    pub command: String,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub prompt_template: Option<String>,
    pub allowed_tools: Option<String>,
}

/// `[review]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub extensions: String,
    pub risk_patterns: Vec<String>,
    pub prompts_dir: Option<PathBuf>,
    pub rules_dir: Option<PathBuf>,
    pub project_brief_file: Option<PathBuf>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            extensions: env_or(
                "RAVEN_REVIEW_EXTENSIONS",
                r"\.(rs|go|py|js|ts|java|rb)$",
            ),
            risk_patterns: vec![
                r"auth".into(),
                r"crypto".into(),
                r"security".into(),
                r"migration".into(),
            ],
            prompts_dir: None,
            rules_dir: None,
            project_brief_file: None,
        }
    }
}

/// Fully resolved configuration: every field has already gone through
/// CLI > env > file > default precedence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResolvedConfig {
    pub project: ProjectConfig,
    pub agents: HashMap<String, AgentConfig>,
    pub review: ReviewConfig,
    pub max_iterations: u32,
    pub max_limit_waits: u32,
    pub sleep_between_secs: u64,
}

/// Records which precedence tier supplied a resolved field, for
/// `raven config debug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub field: String,
    pub source: ConfigSource,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    CliFlag,
    EnvVar,
    ConfigFile,
    Default,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
