//! Fix engine: applies fixes for a consolidated review's findings,
//! re-verifying after each cycle (§4.7 "Fix engine (paired with
//! review)").
//!
//! Grounded on `coordination::reviewer_policy`'s stage-trace
//! idiom (an ordered record of what happened each cycle) generalized
//! from a fixed four-stage pipeline to an open-ended cycle count bounded
//! by `max_cycles` / no-progress detection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, RunOpts};
use crate::error::RavenResult;
use crate::rate_limit::RateLimitCoordinator;
use crate::verify::{VerificationReport, VerificationRunner};

use super::types::ConsolidatedReview;

#[derive(Debug, Clone)]
pub struct FixCycleRecord {
    pub cycle: u32,
    pub agent_exit_code: i32,
    pub verification: VerificationReport,
}

#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub cycles: Vec<FixCycleRecord>,
    pub verified: bool,
    pub stopped_reason: FixStopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStopReason {
    VerificationPassed,
    MaxCyclesReached,
    NoProgress,
}

pub struct FixEngine {
    agent: Arc<dyn Agent>,
    coordinator: Arc<RateLimitCoordinator>,
    verifier: VerificationRunner,
    max_cycles: u32,
}

impl FixEngine {
    pub fn new(
        agent: Arc<dyn Agent>,
        coordinator: Arc<RateLimitCoordinator>,
        verifier: VerificationRunner,
        max_cycles: u32,
    ) -> Self {
        Self {
            agent,
            coordinator,
            verifier,
            max_cycles,
        }
    }

    /// Build the fix prompt from a consolidated review: every finding
    /// plus its file/line/severity, so the agent can address them in one
    /// pass.
    pub fn build_prompt(review: &ConsolidatedReview) -> String {
        let mut prompt = String::from("Address the following review findings:\n\n");
        for finding in &review.findings {
            prompt.push_str(&format!(
                "- [{:?}] {}:{} ({}): {}\n",
                finding.severity, finding.file, finding.line, finding.category, finding.description
            ));
            if let Some(suggestion) = &finding.suggestion {
                prompt.push_str(&format!("  suggestion: {suggestion}\n"));
            }
        }
        prompt
    }

    /// Run fix/verify cycles until verification passes, `max_cycles` is
    /// reached, or two consecutive cycles produce identical verification
    /// output (no progress).
    pub async fn run(
        &self,
        cancel: CancellationToken,
        working_dir: &std::path::Path,
        review: &ConsolidatedReview,
        verification_commands: &[String],
    ) -> RavenResult<FixOutcome> {
        let prompt = Self::build_prompt(review);
        let mut cycles = Vec::new();
        let mut last_stdout: Option<String> = None;

        for cycle in 1..=self.max_cycles.max(1) {
            let provider = crate::agent::provider_for_agent(self.agent.name()).to_string();
            self.coordinator
                .wait_for_reset(&cancel, &provider, "fix", None)
                .await?;

            let opts = RunOpts::new(working_dir).with_prompt(prompt.clone());
            let result = self.agent.run(cancel.clone(), opts).await?;

            let rate_limit = self.agent.parse_rate_limit(&result.stdout);
            if rate_limit.is_limited {
                self.coordinator
                    .record(&provider, rate_limit.reset_after, &rate_limit.message);
                continue;
            }
            self.coordinator.clear(&provider);

            let verification = self.verifier.run_all(verification_commands).await?;
            let verified = verification.all_passed();
            cycles.push(FixCycleRecord {
                cycle,
                agent_exit_code: result.exit_code,
                verification: verification.clone(),
            });

            if verified {
                return Ok(FixOutcome {
                    cycles,
                    verified: true,
                    stopped_reason: FixStopReason::VerificationPassed,
                });
            }

            // Only worth bailing out early on a repeated fingerprint if
            // there is a cycle left to spend — on the last allowed
            // cycle, `MaxCyclesReached` below is the more accurate
            // reason (we are stopping for capacity, not giving up
            // early).
            let fingerprint = verification
                .outcomes
                .iter()
                .map(|o| format!("{}:{:?}", o.command, o.exit_code))
                .collect::<Vec<_>>()
                .join(",");
            if cycle < self.max_cycles && last_stdout.as_deref() == Some(fingerprint.as_str()) {
                return Ok(FixOutcome {
                    cycles,
                    verified: false,
                    stopped_reason: FixStopReason::NoProgress,
                });
            }
            last_stdout = Some(fingerprint);
        }

        Ok(FixOutcome {
            cycles,
            verified: false,
            stopped_reason: FixStopReason::MaxCyclesReached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DryRunCommand, RateLimitInfo, RunResult};
    use crate::review::types::{ConsolidationStats, Finding, Severity, Verdict};
    use crate::verify::VerifyConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct CountingAgent(Arc<AtomicU32>);

    #[async_trait]
    impl Agent for CountingAgent {
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
        async fn run(&self, _cancel: CancellationToken, _opts: RunOpts) -> RavenResult<RunResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RunResult {
                stdout: "fixed it".to_string(),
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

    fn sample_review() -> ConsolidatedReview {
        ConsolidatedReview {
            verdict: Verdict::ChangesNeeded,
            findings: vec![Finding {
                severity: Severity::High,
                category: "bug".to_string(),
                file: "x.rs".to_string(),
                line: 1,
                description: "oops".to_string(),
                suggestion: None,
                attributed_agents: vec!["A".to_string()],
            }],
            stats: ConsolidationStats::default(),
            worker_errors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn stops_on_first_passing_verification() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let engine = FixEngine::new(
            Arc::new(CountingAgent(calls.clone())),
            Arc::new(RateLimitCoordinator::default()),
            VerificationRunner::new(dir.path(), VerifyConfig::default()),
            3,
        );
        let outcome = engine
            .run(CancellationToken::new(), dir.path(), &sample_review(), &["true".to_string()])
            .await
            .unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.stopped_reason, FixStopReason::VerificationPassed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_max_cycles_when_verification_never_passes() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let engine = FixEngine::new(
            Arc::new(CountingAgent(calls.clone())),
            Arc::new(RateLimitCoordinator::default()),
            VerificationRunner::new(dir.path(), VerifyConfig::default()),
            2,
        );
        let outcome = engine
            .run(CancellationToken::new(), dir.path(), &sample_review(), &["false".to_string()])
            .await
            .unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.stopped_reason, FixStopReason::MaxCyclesReached);
        assert_eq!(outcome.cycles.len(), 2);
    }

    #[tokio::test]
    async fn stops_on_no_progress_before_max_cycles_when_a_cycle_remains() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let engine = FixEngine::new(
            Arc::new(CountingAgent(calls.clone())),
            Arc::new(RateLimitCoordinator::default()),
            VerificationRunner::new(dir.path(), VerifyConfig::default()),
            5,
        );
        let outcome = engine
            .run(CancellationToken::new(), dir.path(), &sample_review(), &["false".to_string()])
            .await
            .unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.stopped_reason, FixStopReason::NoProgress);
        // Bails after the 2nd identical fingerprint rather than burning
        // all 5 allowed cycles.
        assert_eq!(outcome.cycles.len(), 2);
    }

    #[test]
    fn build_prompt_includes_every_finding() {
        let prompt = FixEngine::build_prompt(&sample_review());
        assert!(prompt.contains("x.rs:1"));
        assert!(prompt.contains("oops"));
    }
}
