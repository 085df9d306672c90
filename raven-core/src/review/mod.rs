//! Review Pipeline (§4.7): diff -> split -> bounded fan-out -> JSON
//! extraction -> consolidation.
//!
//! Grounded on `swarm-agents::modes::deepthink`'s Map-Reduce
//! fan-out (`Semaphore`-guarded `JoinSet`, "a sibling's panic never
//! cancels the group") for the worker pool shape, generalized from one
//! judge-synthesis reducer to the spec's dedup/escalate/aggregate
//! consolidation in [`consolidate`].

mod consolidate;
mod diff;
mod fix;
mod pr_body;
mod types;

pub use diff::{collect_diff, compile_risk_patterns, split_round_robin, ChangedFile, DiffSet, RiskLevel};
pub use fix::{FixCycleRecord, FixEngine, FixOutcome, FixStopReason};
pub use pr_body::{cap_size, demote_headings, generate_pr_body, DEFAULT_BODY_CAP_BYTES};
pub use types::{
    AgentReviewResult, ConsolidatedReview, ConsolidationStats, Finding, RawReviewOutput, Severity, Verdict,
};

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::RavenResult;
use crate::events::{Event, EventBus, EventKind};
use crate::git::GitSurface;
use crate::json_extract;

/// Fan-out mode (§4.7 Inputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewMode {
    /// Every agent reviews the entire diff.
    All,
    /// Files are partitioned round-robin across agents.
    Split,
}

/// A prompt template placeholder for the embedded review prompt. Not
/// the safe `[[...]]` scanner from [`crate::implement::render_prompt`]
/// (review prompts have no untrusted task-spec text to protect against
/// delimiter collisions) — a plain format string is sufficient here.
const REVIEW_PROMPT_TEMPLATE: &str = r#"You are reviewing a code change.

Project brief:
{brief}

Rules:
{rules}

Diff:
{diff}

Respond with a single JSON object: {{"verdict": "APPROVED"|"CHANGES_NEEDED"|"BLOCKING", "findings": [{{"severity": "info"|"low"|"medium"|"high"|"critical", "category": string, "file": string, "line": number, "description": string, "suggestion": string|null}}], "summary": string}}"#;

/// Size ceiling applied to the diff text embedded in a worker prompt, to
/// keep fan-out prompts bounded regardless of how large the overall
/// diff is (§4.7 "truncated to a size ceiling").
pub const DEFAULT_DIFF_CEILING_BYTES: usize = 48 * 1024;

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub base_ref: String,
    pub agents: Vec<String>,
    pub concurrency: usize,
    pub mode: ReviewMode,
    pub project_brief: String,
    pub rules: String,
    pub extensions: Regex,
    pub risk_patterns: Vec<Regex>,
    pub diff_ceiling_bytes: usize,
}

fn truncate_bytes(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n…(diff truncated)", &text[..end])
}

fn build_prompt(brief: &str, rules: &str, diff: &str, ceiling: usize) -> String {
    REVIEW_PROMPT_TEMPLATE
        .replace("{brief}", brief)
        .replace("{rules}", rules)
        .replace("{diff}", &truncate_bytes(diff, ceiling))
}

pub struct ReviewPipeline {
    git: GitSurface,
    agents: Vec<Arc<dyn Agent>>,
    events: Option<EventBus>,
}

impl ReviewPipeline {
    pub fn new(git: GitSurface, agents: Vec<Arc<dyn Agent>>, events: Option<EventBus>) -> Self {
        Self { git, agents, events }
    }

    /// Run the full pipeline: diff, partition (if split mode), bounded
    /// fan-out, extraction, consolidation.
    pub async fn run(
        &self,
        run_id: &str,
        cancel: CancellationToken,
        request: &ReviewRequest,
    ) -> RavenResult<ConsolidatedReview> {
        let diff_set = collect_diff(
            &self.git,
            &cancel,
            &request.base_ref,
            &request.extensions,
            &request.risk_patterns,
        )
        .await?;

        let per_agent_diff: Vec<(Arc<dyn Agent>, String)> = match request.mode {
            ReviewMode::All => self
                .agents
                .iter()
                .cloned()
                .map(|agent| (agent, diff_set.unified.clone()))
                .collect(),
            ReviewMode::Split => {
                let buckets = split_round_robin(&diff_set.files, self.agents.len().max(1));
                self.agents
                    .iter()
                    .cloned()
                    .zip(buckets)
                    .map(|(agent, bucket)| {
                        let paths: Vec<String> = bucket.into_iter().map(|f| f.path).collect();
                        (agent, diff::sub_diff(&diff_set.unified, &paths))
                    })
                    .collect()
            }
        };

        let results = self
            .fan_out(run_id, cancel, request, per_agent_diff)
            .await;

        Ok(consolidate::consolidate(&results))
    }

    async fn fan_out(
        &self,
        run_id: &str,
        cancel: CancellationToken,
        request: &ReviewRequest,
        per_agent_diff: Vec<(Arc<dyn Agent>, String)>,
    ) -> Vec<AgentReviewResult> {
        let semaphore = Arc::new(Semaphore::new(request.concurrency.max(1)));
        let mut join_set: JoinSet<AgentReviewResult> = JoinSet::new();

        for (agent, diff_text) in per_agent_diff {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let brief = request.project_brief.clone();
            let rules = request.rules.clone();
            let ceiling = request.diff_ceiling_bytes;
            let run_id = run_id.to_string();
            let events = self.events.clone();
            let agent_name = agent.name().to_string();

            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("review semaphore closed");
                if let Some(bus) = &events {
                    bus.emit(Event::new(&run_id, EventKind::ReviewWorkerStarted { agent: agent_name.clone() }));
                }
                let started = Instant::now();
                let prompt = build_prompt(&brief, &rules, &diff_text, ceiling);
                let opts = crate::agent::RunOpts::new(".").with_prompt(prompt);

                // Workers always return success locally (§4.7, §5): a
                // failed invocation is captured in `error`, never
                // propagated, so one flaky agent can't cancel its
                // siblings.
                let outcome = match agent.run(cancel, opts).await {
                    Ok(result) if result.succeeded() => {
                        match json_extract::extract::<RawReviewOutput>(&result.stdout) {
                            Ok(mut parsed) => {
                                for finding in &mut parsed.findings {
                                    finding.attributed_agents = vec![agent_name.clone()];
                                }
                                AgentReviewResult {
                                    agent: agent_name.clone(),
                                    raw_output: result.stdout,
                                    duration: started.elapsed(),
                                    parsed: Some(parsed),
                                    error: None,
                                }
                            }
                            Err(e) => AgentReviewResult {
                                agent: agent_name.clone(),
                                raw_output: result.stdout,
                                duration: started.elapsed(),
                                parsed: None,
                                error: Some(e.to_string()),
                            },
                        }
                    }
                    Ok(result) => AgentReviewResult {
                        agent: agent_name.clone(),
                        raw_output: result.stdout,
                        duration: started.elapsed(),
                        parsed: None,
                        error: Some(format!("agent exited {}", result.exit_code)),
                    },
                    Err(e) => AgentReviewResult {
                        agent: agent_name.clone(),
                        raw_output: String::new(),
                        duration: started.elapsed(),
                        parsed: None,
                        error: Some(e.to_string()),
                    },
                };

                if let Some(bus) = &events {
                    let finding_count = outcome.parsed.as_ref().map(|p| p.findings.len()).unwrap_or(0);
                    bus.emit(Event::new(
                        &run_id,
                        EventKind::ReviewWorkerCompleted { agent: agent_name, finding_count },
                    ));
                }
                outcome
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(AgentReviewResult {
                    agent: "unknown".to_string(),
                    raw_output: String::new(),
                    duration: std::time::Duration::ZERO,
                    parsed: None,
                    error: Some(format!("review worker panicked: {join_err}")),
                }),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DryRunCommand, RateLimitInfo, RunOpts, RunResult};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct ScriptedReviewAgent {
        name: String,
        stdout: String,
    }

    #[async_trait]
    impl Agent for ScriptedReviewAgent {
        fn name(&self) -> &str {
            &self.name
        }
        fn provider(&self) -> &str {
            "anthropic"
        }
        fn check_prerequisites(&self) -> RavenResult<()> {
            Ok(())
        }
        fn dry_run_command(&self, _opts: &RunOpts) -> DryRunCommand {
            DryRunCommand {
                command_line: self.name.clone(),
            }
        }
        async fn run(&self, _cancel: CancellationToken, _opts: RunOpts) -> RavenResult<RunResult> {
            Ok(RunResult {
                stdout: self.stdout.clone(),
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

    fn request() -> ReviewRequest {
        ReviewRequest {
            base_ref: "main".to_string(),
            agents: vec!["a".to_string(), "b".to_string()],
            concurrency: 2,
            mode: ReviewMode::All,
            project_brief: "a test project".to_string(),
            rules: "be nice".to_string(),
            extensions: Regex::new(r"\.rs$").unwrap(),
            risk_patterns: vec![],
            diff_ceiling_bytes: DEFAULT_DIFF_CEILING_BYTES,
        }
    }

    #[tokio::test]
    async fn fan_out_consolidates_findings_from_all_workers() {
        let dir = tempdir().unwrap();
        std::process::Command::new("git").arg("init").current_dir(dir.path()).output().ok();

        let agent_a: Arc<dyn Agent> = Arc::new(ScriptedReviewAgent {
            name: "a".to_string(),
            stdout: r#"{"verdict":"CHANGES_NEEDED","findings":[{"severity":"medium","category":"bug","file":"x.rs","line":1,"description":"issue","suggestion":null}]}"#.to_string(),
        });
        let agent_b: Arc<dyn Agent> = Arc::new(ScriptedReviewAgent {
            name: "b".to_string(),
            stdout: r#"{"verdict":"APPROVED","findings":[]}"#.to_string(),
        });

        let pipeline = ReviewPipeline::new(GitSurface::new(dir.path()), vec![agent_a, agent_b], None);
        let results = pipeline
            .fan_out("run-1", CancellationToken::new(), &request(), vec![
                (pipeline.agents[0].clone(), "diff a".to_string()),
                (pipeline.agents[1].clone(), "diff b".to_string()),
            ])
            .await;

        let review = consolidate::consolidate(&results);
        assert_eq!(review.findings.len(), 1);
        assert_eq!(review.verdict, Verdict::ChangesNeeded);
    }

    #[test]
    fn build_prompt_truncates_oversized_diff() {
        let huge_diff = "x".repeat(200);
        let prompt = build_prompt("brief", "rules", &huge_diff, 50);
        assert!(prompt.contains("truncated"));
        assert!(prompt.len() < huge_diff.len());
    }

    #[test]
    fn build_prompt_embeds_brief_and_rules() {
        let prompt = build_prompt("my brief", "my rules", "diff", 100);
        assert!(prompt.contains("my brief"));
        assert!(prompt.contains("my rules"));
    }
}
