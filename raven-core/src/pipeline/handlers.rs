//! Step handlers for the `review_fix` workflow (§4.7, §4.9), wired onto
//! [`crate::workflow::builtin::review_fix_workflow`]'s three-step graph:
//! `review -> fix -> pr`.
//!
//! Mirrors [`crate::implement::handlers`]'s "handlers share a `Mutex`-
//! guarded context, not the generic metadata bag" shape, generalized
//! from one task's select/invoke/advance cycle to one phase's
//! review/fix/pr cycle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::exec::{run_subprocess, SpawnSpec};
use crate::agent::{Agent, OutputFormat};
use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};
use crate::git::GitSurface;
use crate::review::{generate_pr_body, ConsolidatedReview, FixEngine, FixStopReason, ReviewPipeline, ReviewRequest, Verdict, DEFAULT_BODY_CAP_BYTES};
use crate::workflow::{StepContext, StepHandler, TransitionEvent};

/// Mutable working set shared by the review/fix/pr handlers across one
/// phase's cycle.
pub(super) struct ReviewFixState {
    pub last_review: Option<ConsolidatedReview>,
    pub pr_url: Option<String>,
    pub cycles_run: u32,
}

impl ReviewFixState {
    fn new() -> Self {
        Self {
            last_review: None,
            pr_url: None,
            cycles_run: 0,
        }
    }
}

pub(super) struct ReviewFixShared {
    pub review_pipeline: ReviewPipeline,
    pub review_request: ReviewRequest,
    pub fix_engine: FixEngine,
    pub verification_commands: Vec<String>,
    pub git: GitSurface,
    pub pr_agent: Arc<dyn Agent>,
    pub base_ref: String,
    pub branch: String,
    pub skip_pr: bool,
    pub events: Option<EventBus>,
    pub state: Mutex<ReviewFixState>,
}

impl ReviewFixShared {
    pub fn new(
        review_pipeline: ReviewPipeline,
        review_request: ReviewRequest,
        fix_engine: FixEngine,
        verification_commands: Vec<String>,
        git: GitSurface,
        pr_agent: Arc<dyn Agent>,
        base_ref: String,
        branch: String,
        skip_pr: bool,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            review_pipeline,
            review_request,
            fix_engine,
            verification_commands,
            git,
            pr_agent,
            base_ref,
            branch,
            skip_pr,
            events,
            state: Mutex::new(ReviewFixState::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReviewFixState> {
        self.state.lock().expect("review/fix state poisoned")
    }

    fn emit(&self, run_id: &str, kind: EventKind) {
        if let Some(bus) = &self.events {
            bus.emit(Event::new(run_id, kind));
        }
    }

    pub fn pr_url(&self) -> Option<String> {
        self.lock().pr_url.clone()
    }
}

pub(super) struct ReviewHandler(pub Arc<ReviewFixShared>);
pub(super) struct FixHandler(pub Arc<ReviewFixShared>);
pub(super) struct PrHandler(pub Arc<ReviewFixShared>);

#[async_trait]
impl StepHandler for ReviewHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let review = shared
            .review_pipeline
            .run(&ctx.run_id, ctx.cancel.clone(), &shared.review_request)
            .await?;

        let event = match review.verdict {
            Verdict::Approved => TransitionEvent::Success,
            Verdict::ChangesNeeded => TransitionEvent::Partial,
            Verdict::Blocking => TransitionEvent::NeedsHuman,
        };
        shared.lock().last_review = Some(review);
        Ok(event)
    }
}

#[async_trait]
impl StepHandler for FixHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let review = shared
            .lock()
            .last_review
            .clone()
            .ok_or_else(|| RavenError::InvalidInput("fix step ran with no prior review".into()))?;

        shared.lock().cycles_run += 1;
        let outcome = shared
            .fix_engine
            .run(ctx.cancel.clone(), shared.git.working_dir(), &review, &shared.verification_commands)
            .await?;

        for record in &outcome.cycles {
            shared.emit(&ctx.run_id, EventKind::FixCycleStarted { cycle: record.cycle });
            shared.emit(
                &ctx.run_id,
                EventKind::FixCycleCompleted {
                    cycle: record.cycle,
                    verified: record.verification.all_passed(),
                },
            );
        }

        match outcome.stopped_reason {
            FixStopReason::VerificationPassed => Ok(TransitionEvent::Success),
            FixStopReason::MaxCyclesReached => Ok(TransitionEvent::Partial),
            FixStopReason::NoProgress => Ok(TransitionEvent::Blocked),
        }
    }
}

#[async_trait]
impl StepHandler for PrHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        if shared.skip_pr {
            return Ok(TransitionEvent::Success);
        }

        shared.git.push(&ctx.cancel, "origin", &shared.branch).await?;

        let diff_text = shared
            .git
            .diff_unified(&ctx.cancel, &shared.base_ref)
            .await
            .unwrap_or_default();
        let findings_resolved = shared
            .lock()
            .last_review
            .as_ref()
            .map(|r| r.findings.len())
            .unwrap_or(0);
        let files_changed = shared
            .git
            .diff_name_status(&ctx.cancel, &shared.base_ref)
            .await
            .map(|entries| entries.len())
            .unwrap_or(0);

        let body = generate_pr_body(
            &shared.pr_agent,
            ctx.cancel.clone(),
            shared.git.working_dir(),
            &shared.branch,
            &diff_text,
            files_changed,
            findings_resolved,
            DEFAULT_BODY_CAP_BYTES,
        )
        .await;

        let spec = SpawnSpec {
            program: "gh",
            args: vec![
                "pr".to_string(),
                "create".to_string(),
                "--base".to_string(),
                shared.base_ref.clone(),
                "--head".to_string(),
                shared.branch.clone(),
                "--title".to_string(),
                format!("raven: {}", shared.branch),
                "--body".to_string(),
                body,
            ],
            working_directory: shared.git.working_dir(),
            env: std::collections::HashMap::new(),
            output_format: OutputFormat::Text,
            stream_events: None,
            agent_name: "gh".to_string(),
        };

        let result = run_subprocess(ctx.cancel.clone(), spec).await?;
        if !result.succeeded() {
            return Err(RavenError::subprocess_failed(
                "gh pr create",
                Some(result.exit_code),
                result.stderr,
            ));
        }
        let url = result.stdout.trim().lines().last().unwrap_or("").to_string();
        shared.lock().pr_url = Some(url);
        Ok(TransitionEvent::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DryRunCommand, RateLimitInfo, RunOpts, RunResult};
    use crate::rate_limit::RateLimitCoordinator as Coordinator;
    use crate::review::types::{ConsolidationStats, Finding, Severity};
    use crate::verify::{VerificationRunner, VerifyConfig};
    use regex::Regex;
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct ApprovingAgent;

    #[async_trait]
    impl Agent for ApprovingAgent {
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
            DryRunCommand { command_line: "scripted".to_string() }
        }
        async fn run(&self, _cancel: CancellationToken, _opts: RunOpts) -> RavenResult<RunResult> {
            Ok(RunResult {
                stdout: r#"{"verdict":"APPROVED","findings":[]}"#.to_string(),
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

    fn shared_with(agent: Arc<dyn Agent>, dir: &std::path::Path) -> Arc<ReviewFixShared> {
        std::process::Command::new("git").arg("init").current_dir(dir).output().ok();
        let git = GitSurface::new(dir);
        let review_pipeline = ReviewPipeline::new(GitSurface::new(dir), vec![agent.clone()], None);
        let review_request = ReviewRequest {
            base_ref: "main".to_string(),
            agents: vec!["scripted".to_string()],
            concurrency: 1,
            mode: crate::review::ReviewMode::All,
            project_brief: "brief".to_string(),
            rules: "rules".to_string(),
            extensions: Regex::new(r".*").unwrap(),
            risk_patterns: vec![],
            diff_ceiling_bytes: crate::review::DEFAULT_DIFF_CEILING_BYTES,
        };
        let fix_engine = FixEngine::new(
            agent.clone(),
            Arc::new(Coordinator::default()),
            VerificationRunner::new(dir, VerifyConfig::default()),
            1,
        );
        Arc::new(ReviewFixShared::new(
            review_pipeline,
            review_request,
            fix_engine,
            vec![],
            git,
            agent,
            "main".to_string(),
            "phase/1-core".to_string(),
            true,
            None,
        ))
    }

    fn ctx(run_id: &str, step: &str) -> StepContext {
        StepContext {
            run_id: run_id.to_string(),
            step: step.to_string(),
            metadata: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn clean_review_transitions_straight_to_success() {
        let dir = tempdir().unwrap();
        let shared = shared_with(Arc::new(ApprovingAgent), dir.path());
        let event = ReviewHandler(shared.clone()).execute(&ctx("run-1", "review")).await.unwrap();
        assert_eq!(event, TransitionEvent::Success);
    }

    #[tokio::test]
    async fn skip_pr_short_circuits_to_success() {
        let dir = tempdir().unwrap();
        let shared = shared_with(Arc::new(ApprovingAgent), dir.path());
        let event = PrHandler(shared.clone()).execute(&ctx("run-1", "pr")).await.unwrap();
        assert_eq!(event, TransitionEvent::Success);
        assert!(shared.pr_url().is_none());
    }

    #[tokio::test]
    async fn fix_without_a_prior_review_is_an_error() {
        let dir = tempdir().unwrap();
        let shared = shared_with(Arc::new(ApprovingAgent), dir.path());
        let result = FixHandler(shared).execute(&ctx("run-1", "fix")).await;
        assert!(result.is_err());
    }

    #[test]
    fn sample_review_stats() {
        let review = ConsolidatedReview {
            verdict: Verdict::ChangesNeeded,
            findings: vec![Finding {
                severity: Severity::Low,
                category: "x".to_string(),
                file: "x.rs".to_string(),
                line: 1,
                description: "d".to_string(),
                suggestion: None,
                attributed_agents: vec!["a".to_string()],
            }],
            stats: ConsolidationStats::default(),
            worker_errors: Vec::new(),
        };
        assert_eq!(review.findings.len(), 1);
    }
}
