//! Stage 2 — Scatter: one worker per epic, bounded by a concurrency cap,
//! each expanding its epic into tasks and writing the result to a file
//! in the work directory rather than stdout (§4.8 Stage 2).
//!
//! Grounded on the same `Semaphore` + `JoinSet` fan-out shape as
//! [`crate::review`]'s worker pool, generalized from "review this diff"
//! to "expand this epic," with the spec's per-worker retry-with-
//! validation-feedback loop layered on top of each slot.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::{provider_for_agent, Agent, RunOpts};
use crate::error::{RavenError, RavenResult};
use crate::json_extract;
use crate::rate_limit::RateLimitCoordinator;

use super::types::{Epic, EpicTasks, ScatterOutcome};

const SCATTER_PROMPT_TEMPLATE: &str = r#"Expand the following epic into a list of concrete tasks. Each task gets a temporary id "{epic_id}-T01", "{epic_id}-T02", etc, a title, a description, a list of dependencies (either another task id in this same epic, or a cross-epic reference formatted "E-NNN:title-slug"), and acceptance criteria.

Full PRD:
{prd}

This epic:
id={epic_id} title={epic_title}
{epic_summary}

Other epics (for cross-referencing only, do not re-describe them):
{other_epics}

Write your answer as a single JSON object to the file at: {out_path}
Shape: {{"epic_id": "{epic_id}", "tasks": [{{"id": "{epic_id}-T01", "title": string, "description": string, "dependencies": [string], "acceptance_criteria": [string]}}]}}"#;

fn build_prompt(
    prd: &str,
    epic: &Epic,
    other_epics_summary: &str,
    out_path: &std::path::Path,
    previous_error: Option<&str>,
) -> String {
    let base = SCATTER_PROMPT_TEMPLATE
        .replace("{prd}", prd)
        .replace("{epic_id}", &epic.id)
        .replace("{epic_title}", &epic.title)
        .replace("{epic_summary}", &epic.summary)
        .replace("{other_epics}", other_epics_summary)
        .replace("{out_path}", &out_path.display().to_string());
    match previous_error {
        Some(err) => format!(
            "{base}\n\nYour previous response at that path did not validate: {err}\nRewrite the file with only the corrected JSON object."
        ),
        None => base,
    }
}

fn other_epics_summary(epics: &[Epic], exclude_id: &str) -> String {
    epics
        .iter()
        .filter(|e| e.id != exclude_id)
        .map(|e| format!("- {} ({}): {}", e.id, e.title, e.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run one epic's retry loop: invoke the agent, read `out_path`, extract
/// an [`EpicTasks`]. Validation failures retry up to `max_retries` with
/// the error fed back; exhausting retries is the non-fatal "validation
/// exhausted" sentinel (§4.8 Stage 2).
async fn scatter_one(
    agent: Arc<dyn Agent>,
    coordinator: Arc<RateLimitCoordinator>,
    cancel: CancellationToken,
    working_dir: PathBuf,
    work_dir: PathBuf,
    prd: String,
    epic: Epic,
    other_summary: String,
    max_retries: u32,
) -> ScatterOutcome {
    let provider = provider_for_agent(agent.name()).to_string();
    let out_path = work_dir.join(format!("{}.json", epic.id));
    let mut last_error: Option<String> = None;

    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return ScatterOutcome {
                epic_id: epic.id.clone(),
                tasks: Vec::new(),
                validation_exhausted: false,
                error: Some("cancelled".to_string()),
            };
        }

        if let Err(e) = coordinator
            .wait_for_reset(&cancel, &provider, "prd-scatter", None)
            .await
        {
            return ScatterOutcome {
                epic_id: epic.id.clone(),
                tasks: Vec::new(),
                validation_exhausted: false,
                error: Some(e.to_string()),
            };
        }
        if coordinator.exceeded_max_waits(&provider) {
            return ScatterOutcome {
                epic_id: epic.id.clone(),
                tasks: Vec::new(),
                validation_exhausted: false,
                error: Some(format!("max rate-limit waits exceeded for {provider}")),
            };
        }

        let prompt = build_prompt(&prd, &epic, &other_summary, &out_path, last_error.as_deref());
        let run = agent
            .run(cancel.clone(), RunOpts::new(&working_dir).with_prompt(prompt))
            .await;

        let result = match run {
            Ok(r) => r,
            Err(e) => {
                return ScatterOutcome {
                    epic_id: epic.id.clone(),
                    tasks: Vec::new(),
                    validation_exhausted: false,
                    error: Some(e.to_string()),
                }
            }
        };

        let rate_limit = agent.parse_rate_limit(&result.stdout);
        if rate_limit.is_limited {
            coordinator.record(&provider, rate_limit.reset_after, &rate_limit.message);
            continue;
        }
        coordinator.clear(&provider);

        let file_content = match std::fs::read_to_string(&out_path) {
            Ok(content) => content,
            Err(_) => result.stdout.clone(),
        };

        match json_extract::extract::<EpicTasks>(&file_content) {
            Ok(epic_tasks) if epic_tasks.epic_id == epic.id && !epic_tasks.tasks.is_empty() => {
                return ScatterOutcome {
                    epic_id: epic.id.clone(),
                    tasks: epic_tasks.tasks,
                    validation_exhausted: false,
                    error: None,
                };
            }
            Ok(_) => last_error = Some("epic_id mismatch or zero tasks".to_string()),
            Err(e) => last_error = Some(e.to_string()),
        }

        attempt += 1;
        if attempt > max_retries {
            return ScatterOutcome {
                epic_id: epic.id.clone(),
                tasks: Vec::new(),
                validation_exhausted: true,
                error: last_error,
            };
        }
    }
}

/// Fan out one worker per epic, bounded by `concurrency`.
pub async fn scatter(
    agent: Arc<dyn Agent>,
    coordinator: Arc<RateLimitCoordinator>,
    cancel: CancellationToken,
    working_dir: &std::path::Path,
    work_dir: &std::path::Path,
    prd: &str,
    epics: &[Epic],
    concurrency: usize,
    max_retries: u32,
) -> RavenResult<Vec<ScatterOutcome>> {
    std::fs::create_dir_all(work_dir).map_err(|e| RavenError::io(work_dir, e))?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set: JoinSet<ScatterOutcome> = JoinSet::new();

    for epic in epics {
        let semaphore = semaphore.clone();
        let agent = agent.clone();
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        let working_dir = working_dir.to_path_buf();
        let work_dir = work_dir.to_path_buf();
        let prd = prd.to_string();
        let other_summary = other_epics_summary(epics, &epic.id);
        let epic = epic.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("scatter semaphore closed");
            scatter_one(
                agent,
                coordinator,
                cancel,
                working_dir,
                work_dir,
                prd,
                epic,
                other_summary,
                max_retries,
            )
            .await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => outcomes.push(ScatterOutcome {
                epic_id: "unknown".to_string(),
                tasks: Vec::new(),
                validation_exhausted: false,
                error: Some(format!("scatter worker panicked: {join_err}")),
            }),
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DryRunCommand, RateLimitInfo, RunResult};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FileWritingAgent;

    #[async_trait]
    impl Agent for FileWritingAgent {
        fn name(&self) -> &str {
            "scripted"
        }
        fn provider(&self) -> &str {
            "anthropic"
        }
        fn check_prerequisites(&self) -> RavenResult<()> {
            Ok(())
        }
        fn dry_run_command(&self, _opts: &RunOpts) -> DryRunCommand {
            DryRunCommand {
                command_line: "scripted".to_string(),
            }
        }
        async fn run(&self, _cancel: CancellationToken, opts: RunOpts) -> RavenResult<RunResult> {
            let prompt = opts.prompt_text.unwrap_or_default();
            let marker = "Write your answer as a single JSON object to the file at: ";
            let path_line = prompt
                .lines()
                .find(|l| l.starts_with(marker))
                .map(|l| l.trim_start_matches(marker).to_string())
                .unwrap();
            let epic_id = prompt
                .lines()
                .find(|l| l.starts_with("id="))
                .and_then(|l| l.strip_prefix("id="))
                .and_then(|l| l.split(' ').next())
                .unwrap()
                .to_string();
            std::fs::write(
                &path_line,
                format!(
                    r#"{{"epic_id":"{epic_id}","tasks":[{{"id":"{epic_id}-T01","title":"do thing","description":"d","dependencies":[],"acceptance_criteria":["works"]}}]}}"#
                ),
            )
            .unwrap();
            Ok(RunResult {
                stdout: "wrote file".to_string(),
                stderr: String::new(),
                exit_code: 0,
                duration: std::time::Duration::from_millis(1),
                rate_limit: None,
            })
        }
        fn parse_rate_limit(&self, _output: &str) -> RateLimitInfo {
            RateLimitInfo::default()
        }
    }

    #[tokio::test]
    async fn scatters_one_worker_per_epic_and_reads_its_file() {
        let dir = tempdir().unwrap();
        let epics = vec![
            Epic {
                id: "E-001".to_string(),
                title: "Auth".to_string(),
                summary: "s".to_string(),
                dependencies: vec![],
            },
            Epic {
                id: "E-002".to_string(),
                title: "Billing".to_string(),
                summary: "s".to_string(),
                dependencies: vec![],
            },
        ];
        let outcomes = scatter(
            Arc::new(FileWritingAgent),
            Arc::new(RateLimitCoordinator::default()),
            CancellationToken::new(),
            dir.path(),
            &dir.path().join("work"),
            "a prd",
            &epics,
            2,
            1,
        )
        .await
        .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.tasks.len() == 1));
    }
}
