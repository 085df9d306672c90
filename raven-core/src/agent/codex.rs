//! Codex-like CLI adapter: line-oriented text output, no `stream-json`
//! support. Grounded on [`super::claude::ClaudeAdapter`]'s structure but
//! simplified to the "Codex-like" variant the spec requires (§4.1: "at
//! least two variants").

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::exec::{run_subprocess, SpawnSpec};
use super::{
    merge_environment, Agent, DryRunCommand, OutputFormat, RateLimitInfo, RunOpts, RunResult,
};
use crate::error::{RavenError, RavenResult};

pub struct CodexAdapter {
    command: String,
}

impl CodexAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_args(&self, opts: &RunOpts, prompt_path: Option<&PathBuf>) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(model) = &opts.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(effort) = &opts.effort {
            args.push("--effort".into());
            args.push(effort.clone());
        }
        if let Some(path) = prompt_path {
            args.push("--prompt-file".into());
            args.push(path.display().to_string());
        } else if let Some(text) = &opts.prompt_text {
            args.push(text.clone());
        }
        args
    }

    fn maybe_spill_prompt(&self, opts: &RunOpts) -> RavenResult<Option<PathBuf>> {
        if let Some(path) = &opts.prompt_file_path {
            return Ok(Some(path.clone()));
        }
        let Some(text) = &opts.prompt_text else {
            return Ok(None);
        };
        if text.len() <= opts.large_prompt_threshold {
            return Ok(None);
        }
        let path = opts
            .working_directory
            .join(format!("raven-prompt-{}.txt", uuid::Uuid::new_v4().simple()));
        std::fs::write(&path, text).map_err(|e| RavenError::io(&path, e))?;
        Ok(Some(path))
    }
}

#[async_trait]
impl Agent for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn check_prerequisites(&self) -> RavenResult<()> {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        let found = std::env::split_paths(&path_var).any(|dir| dir.join(&self.command).is_file());
        if found || self.command.contains('/') {
            Ok(())
        } else {
            Err(RavenError::PrerequisiteMissing(format!(
                "'{}' was not found on PATH",
                self.command
            )))
        }
    }

    fn dry_run_command(&self, opts: &RunOpts) -> DryRunCommand {
        let args = self.build_args(opts, None);
        let preview = opts
            .prompt_text
            .as_deref()
            .map(|t| t.chars().take(120).collect::<String>())
            .unwrap_or_default();
        DryRunCommand {
            command_line: format!("{} {} # prompt: {preview}", self.command, args.join(" ")),
        }
    }

    async fn run(&self, cancel: CancellationToken, opts: RunOpts) -> RavenResult<RunResult> {
        let spill = self.maybe_spill_prompt(&opts)?;
        let args = self.build_args(&opts, spill.as_ref());
        let spec = SpawnSpec {
            program: &self.command,
            args,
            working_directory: &opts.working_directory,
            env: merge_environment(&opts.environment_additions),
            output_format: OutputFormat::Text,
            stream_events: opts.stream_events,
            agent_name: self.name().to_string(),
        };
        let mut result = run_subprocess(cancel, spec).await?;
        let combined = format!("{}\n{}", result.stdout, result.stderr);
        let rl = self.parse_rate_limit(&combined);
        result.rate_limit = if rl.is_limited { Some(rl) } else { None };
        Ok(result)
    }

    fn parse_rate_limit(&self, output: &str) -> RateLimitInfo {
        super::rate_limit_parse::parse(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_truncates_prompt() {
        let agent = CodexAdapter::new("codex");
        let opts = RunOpts::new(".").with_prompt("x".repeat(200));
        let preview = agent.dry_run_command(&opts);
        assert!(preview.command_line.len() < 400);
    }
}
