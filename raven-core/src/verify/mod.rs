//! Verification Runner: executes the project's configured shell
//! verification commands with a per-command timeout and two-tier output
//! truncation.
//!
//! Grounded on
//! `swarm-agents::tools::exec_tool::RunCommandTool` (`sh -c`, a timeout
//! that widens for `cargo test`-shaped commands, `spawn_blocking` to
//! keep the runtime free) generalized from one LLM-selected command to
//! a fixed, config-driven list, and on the harness-wide
//! "never let one pathological command hang the run" discipline.

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::error::RavenResult;

/// Default per-command timeout (§4.12).
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Widened timeout applied when the command string contains a "slow"
/// marker (default: `test`), mirroring `cargo test`
/// special case.
pub const SLOW_TIMEOUT_SECS: u64 = 300;

const DEFAULT_BYTE_CAP_PER_LINE: usize = 4 * 1024;
const DEFAULT_HEAD_LINES: usize = 200;
const DEFAULT_TAIL_LINES: usize = 50;

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub default_timeout: Duration,
    pub slow_timeout: Duration,
    pub slow_markers: Vec<String>,
    pub byte_cap_per_line: usize,
    pub head_lines: usize,
    pub tail_lines: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            slow_timeout: Duration::from_secs(SLOW_TIMEOUT_SECS),
            slow_markers: vec!["test".to_string()],
            byte_cap_per_line: DEFAULT_BYTE_CAP_PER_LINE,
            head_lines: DEFAULT_HEAD_LINES,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

impl VerifyConfig {
    fn timeout_for(&self, command: &str) -> Duration {
        if self.slow_markers.iter().any(|m| command.contains(m.as_str())) {
            self.slow_timeout
        } else {
            self.default_timeout
        }
    }

    /// Truncate `text`: cap each line's byte length, then cap the total
    /// line count with a head+tail window and an elision marker.
    fn truncate(&self, text: &str) -> (String, bool) {
        let mut truncated_any_line = false;
        let capped_lines: Vec<String> = text
            .lines()
            .map(|line| {
                if line.len() > self.byte_cap_per_line {
                    truncated_any_line = true;
                    let mut end = self.byte_cap_per_line.min(line.len());
                    while end > 0 && !line.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}…[line truncated]", &line[..end])
                } else {
                    line.to_string()
                }
            })
            .collect();

        if capped_lines.len() <= self.head_lines + self.tail_lines {
            return (capped_lines.join("\n"), truncated_any_line);
        }

        let head = &capped_lines[..self.head_lines];
        let tail = &capped_lines[capped_lines.len() - self.tail_lines..];
        let elided = capped_lines.len() - self.head_lines - self.tail_lines;
        let mut joined = head.join("\n");
        joined.push_str(&format!("\n… [{elided} lines elided] …\n"));
        joined.push_str(&tail.join("\n"));
        (joined, true)
    }
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
}

impl VerificationOutcome {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub outcomes: Vec<VerificationOutcome>,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed())
    }
}

pub struct VerificationRunner {
    working_dir: std::path::PathBuf,
    config: VerifyConfig,
}

impl VerificationRunner {
    pub fn new(working_dir: impl Into<std::path::PathBuf>, config: VerifyConfig) -> Self {
        Self {
            working_dir: working_dir.into(),
            config,
        }
    }

    pub async fn run_all(&self, commands: &[String]) -> RavenResult<VerificationReport> {
        let mut outcomes = Vec::with_capacity(commands.len());
        for command in commands {
            outcomes.push(self.run_one(command).await?);
        }
        Ok(VerificationReport { outcomes })
    }

    pub async fn run_one(&self, command: &str) -> RavenResult<VerificationOutcome> {
        let command = command.to_string();
        let working_dir = self.working_dir.clone();
        let wait = self.config.timeout_for(&command);
        let started = Instant::now();

        let run_command = command.clone();
        let spawned = tokio::task::spawn_blocking(move || {
            #[cfg(unix)]
            let output = std::process::Command::new("sh")
                .args(["-c", &run_command])
                .current_dir(&working_dir)
                .output();
            #[cfg(windows)]
            let output = std::process::Command::new("cmd")
                .args(["/C", &run_command])
                .current_dir(&working_dir)
                .output();
            output
        });

        match timeout(wait, spawned).await {
            Ok(Ok(Ok(output))) => {
                let stdout_raw = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr_raw = String::from_utf8_lossy(&output.stderr).into_owned();
                let (stdout, stdout_truncated) = self.config.truncate(&stdout_raw);
                let (stderr, stderr_truncated) = self.config.truncate(&stderr_raw);
                Ok(VerificationOutcome {
                    command,
                    exit_code: output.status.code(),
                    duration: started.elapsed(),
                    stdout,
                    stderr,
                    stdout_truncated,
                    stderr_truncated,
                    timed_out: false,
                })
            }
            Ok(Ok(Err(e))) => Ok(VerificationOutcome {
                command,
                exit_code: None,
                duration: started.elapsed(),
                stdout: String::new(),
                stderr: format!("failed to start: {e}"),
                stdout_truncated: false,
                stderr_truncated: false,
                timed_out: false,
            }),
            Ok(Err(_join_err)) => Ok(VerificationOutcome {
                command,
                exit_code: None,
                duration: started.elapsed(),
                stdout: String::new(),
                stderr: "verification task panicked".to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
                timed_out: false,
            }),
            Err(_elapsed) => Ok(VerificationOutcome {
                command,
                exit_code: None,
                duration: wait,
                stdout: String::new(),
                stderr: "timed out".to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
                timed_out: true,
            }),
        }
    }
}
