//! Agent Adapter: a uniform contract over external AI coder processes.
//!
//! Grounded on the rig-based agent layer in `swarm-agents::agents`
//! for the shape of a pluggable per-provider wrapper, but the mechanism is
//! entirely different: that layer calls `rig::completion` directly over
//! HTTP; Raven's Non-goals forbid that (§1 "direct HTTP to any AI
//! provider"). Every adapter here spawns an external CLI subprocess and
//! speaks to it over stdio, following the subprocess-execution pattern in
//! `swarm-agents::tools::exec_tool::RunCommandTool`.

mod claude;
mod codex;
pub(crate) mod exec;
mod rate_limit_parse;
mod registry;
mod stub;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use registry::AgentRegistry;
pub use stub::StubAdapter;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RavenResult;
use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    StreamJson,
}

/// Options governing a single agent invocation.
#[derive(Debug, Clone)]
pub struct RunOpts {
    pub prompt_text: Option<String>,
    pub prompt_file_path: Option<PathBuf>,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub allowed_tools: Option<String>,
    pub output_format: OutputFormat,
    pub working_directory: PathBuf,
    pub environment_additions: Vec<(String, String)>,
    /// Events the adapter tees decoded stream-json into. `None` disables
    /// teeing. Emission through this handle is always non-blocking.
    pub stream_events: Option<EventBus>,
    /// Threshold (bytes) above which `prompt_text` is spilled to a temp
    /// file and the path passed on the command line instead.
    pub large_prompt_threshold: usize,
}

impl RunOpts {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            prompt_text: None,
            prompt_file_path: None,
            model: None,
            effort: None,
            allowed_tools: None,
            output_format: OutputFormat::Text,
            working_directory: working_directory.into(),
            environment_additions: Vec::new(),
            stream_events: None,
            large_prompt_threshold: 32 * 1024,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_text = Some(prompt.into());
        self
    }
}

/// A point-in-time rate-limit signal parsed from captured agent output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub is_limited: bool,
    pub reset_after: Duration,
    pub message: String,
}

/// Result of one full `run`.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub rate_limit: Option<RateLimitInfo>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Human-readable command preview for `dry_run_command`, with the prompt
/// truncated so a terminal transcript stays readable.
#[derive(Debug, Clone)]
pub struct DryRunCommand {
    pub command_line: String,
}

/// Uniform contract every agent wrapper implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable string identifier, e.g. `"claude"`, `"codex"`.
    fn name(&self) -> &str;

    /// The upstream provider this agent bills against, for rate-limit
    /// coordination (§4.2: keyed by provider, not by agent).
    fn provider(&self) -> &str;

    /// Ok, or a descriptive error naming the missing executable.
    fn check_prerequisites(&self) -> RavenResult<()>;

    /// Human-readable command preview; no side effects.
    fn dry_run_command(&self, opts: &RunOpts) -> DryRunCommand;

    /// Execute the agent subprocess. Cancelling `cancel` MUST kill it.
    async fn run(&self, cancel: CancellationToken, opts: RunOpts) -> RavenResult<RunResult>;

    /// Pure function over captured output; does not invoke the agent.
    fn parse_rate_limit(&self, output: &str) -> RateLimitInfo;
}

/// Static agent-name → provider table, used when an adapter needs to be
/// constructed generically from config rather than by name-matching.
pub fn provider_for_agent(agent_name: &str) -> &'static str {
    match agent_name {
        "claude" | "claude-code" => "anthropic",
        "codex" | "codex-cli" => "openai",
        "gemini" => "google",
        _ => "unknown",
    }
}

pub(crate) fn merge_environment(additions: &[(String, String)]) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in additions {
        env.insert(k.clone(), v.clone());
    }
    env
}
