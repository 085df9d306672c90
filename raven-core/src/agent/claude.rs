//! Claude-like CLI adapter: `--output-format stream-json`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::exec::{run_subprocess, SpawnSpec};
use super::{merge_environment, Agent, DryRunCommand, OutputFormat, RateLimitInfo, RunOpts, RunResult};
use crate::error::{RavenError, RavenResult};

pub struct ClaudeAdapter {
    command: String,
}

impl ClaudeAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_args(&self, opts: &RunOpts, prompt_path: Option<&PathBuf>) -> Vec<String> {
        let mut args = Vec::new();
        match opts.output_format {
            OutputFormat::StreamJson => {
                args.push("--output-format".into());
                args.push("stream-json".into());
            }
            OutputFormat::Json => {
                args.push("--output-format".into());
                args.push("json".into());
            }
            OutputFormat::Text => {}
        }
        if let Some(model) = &opts.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        if let Some(tools) = &opts.allowed_tools {
            args.push("--allowed-tools".into());
            args.push(tools.clone());
        }
        if let Some(path) = prompt_path {
            args.push("--prompt-file".into());
            args.push(path.display().to_string());
        } else if let Some(text) = &opts.prompt_text {
            args.push("--print".into());
            args.push(text.clone());
        }
        args
    }

    /// Spill `prompt_text` to a temp file when it exceeds the adapter's
    /// large-prompt threshold (§4.1), returning the path if spilled.
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
impl Agent for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn check_prerequisites(&self) -> RavenResult<()> {
        which(&self.command)
    }

    fn dry_run_command(&self, opts: &RunOpts) -> DryRunCommand {
        let args = self.build_args(opts, None);
        let preview = opts
            .prompt_text
            .as_deref()
            .map(|t| truncate(t, 120))
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
            output_format: opts.output_format,
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

fn which(command: &str) -> RavenResult<()> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let found = std::env::split_paths(&path_var).any(|dir| dir.join(command).is_file());
    if found || command.contains('/') {
        Ok(())
    } else {
        Err(RavenError::PrerequisiteMissing(format!(
            "'{command}' was not found on PATH"
        )))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max.min(s.len());
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

