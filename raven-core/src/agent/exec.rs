//! Shared subprocess execution for agent adapters.
//!
//! Spawns via `tokio::process::Command` (rather than
//! `spawn_blocking` + `std::process::Command` in `exec_tool.rs`) because
//! an agent run must be killable mid-flight on cancellation and, for
//! `stream-json` output, must be teed line-by-line while still running —
//! both need a live async child handle, not a blocking `.output()` call.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};
use crate::stream::StreamDecoder;

use super::{OutputFormat, RunResult};

/// Scanner buffer floor for JSONL tool-result lines (§4.3: "≥1 MiB per line").
pub const LINE_BUFFER_FLOOR: usize = 1024 * 1024;

pub struct SpawnSpec<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub working_directory: &'a Path,
    pub env: HashMap<String, String>,
    pub output_format: OutputFormat,
    pub stream_events: Option<EventBus>,
    pub agent_name: String,
}

/// Run a configured subprocess to completion, teeing stdout through the
/// stream decoder when requested. Killing `cancel` kills the child.
pub async fn run_subprocess(
    cancel: CancellationToken,
    spec: SpawnSpec<'_>,
) -> RavenResult<RunResult> {
    let started = Instant::now();

    let mut command = Command::new(spec.program);
    command
        .args(&spec.args)
        .current_dir(spec.working_directory)
        .envs(&spec.env)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        RavenError::subprocess_failed(spec.program, None, format!("failed to start: {e}"))
    })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let mut stdout_reader = BufReader::with_capacity(LINE_BUFFER_FLOOR, stdout);
    let mut stderr_reader = BufReader::with_capacity(64 * 1024, stderr);

    let tee_stream_json = matches!(spec.output_format, OutputFormat::StreamJson)
        && spec.stream_events.is_some();

    let stdout_task = tokio::spawn(async move {
        let mut collected = String::new();
        if tee_stream_json {
            let bus = spec.stream_events.clone().unwrap();
            let mut decoder = StreamDecoder::new();
            let mut line = String::new();
            loop {
                line.clear();
                match stdout_reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        collected.push_str(&line);
                        for decoded in decoder.feed_line(&line) {
                            bus.emit(Event::new(
                                "stream",
                                EventKind::AgentThinking {
                                    agent: spec.agent_name.clone(),
                                    preview: decoded.preview(),
                                },
                            ));
                        }
                    }
                    Err(_) => break,
                }
            }
        } else {
            let _ = stdout_reader.read_to_string(&mut collected).await;
        }
        collected
    });

    let stderr_task = tokio::spawn(async move {
        let mut collected = String::new();
        let _ = stderr_reader.read_to_string(&mut collected).await;
        collected
    });

    let exit_status = tokio::select! {
        status = child.wait() => status.map_err(|e| RavenError::subprocess_failed(
            spec.program, None, format!("wait failed: {e}"),
        ))?,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(RavenError::Cancelled);
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(RunResult {
        stdout,
        stderr,
        exit_code: exit_status.code().unwrap_or(-1),
        duration: started.elapsed(),
        rate_limit: None,
    })
}

pub fn humanize_duration(d: Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}
