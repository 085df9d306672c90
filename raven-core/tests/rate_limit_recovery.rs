//! End-to-end: a rate-limited agent recovers mid-run (spec §8 scenario
//! 2 — "Rate-limited agent recovers").
//!
//! A scripted agent reports itself rate-limited on its first
//! invocation, then succeeds on the second. The coordinator should
//! record the limit once, the loop should wait out the reset and
//! retry, and the task should still complete.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use raven_core::agent::{Agent, DryRunCommand, RateLimitInfo, RunOpts, RunResult};
use raven_core::error::RavenResult;
use raven_core::git::GitSurface;
use raven_core::implement::{ImplementationLoop, LoopConfig, LoopOutcome};
use raven_core::rate_limit::{BackoffPolicy, RateLimitCoordinator};
use raven_core::task::{PhaseConfig, Task, TaskStateStore, TaskStatus};

struct FlakyAgent {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Agent for FlakyAgent {
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
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(RunResult {
                stdout: "please try again in 1s".to_string(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1),
                rate_limit: Some(RateLimitInfo {
                    is_limited: true,
                    reset_after: Duration::from_millis(50),
                    message: "please try again in 1s".to_string(),
                }),
            })
        } else {
            Ok(RunResult {
                stdout: "all done, no signal here".to_string(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1),
                rate_limit: None,
            })
        }
    }
    fn parse_rate_limit(&self, _output: &str) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}

#[tokio::test]
async fn rate_limited_agent_recovers_and_completes() {
    let dir = tempdir().unwrap();
    let state_store = Arc::new(TaskStateStore::load(dir.path().join("task-state.conf")).unwrap());
    let phases = PhaseConfig::parse("1|Core|T-001|T-001\n").unwrap();
    let coordinator = Arc::new(RateLimitCoordinator::new(BackoffPolicy {
        default_wait: Duration::from_millis(50),
        max_waits: 3,
        jitter_factor: 0.0,
    }));
    let git = GitSurface::new(dir.path());
    let calls = Arc::new(AtomicU32::new(0));

    let config = LoopConfig {
        phase_id: Some(1),
        ..Default::default()
    };
    let implementation = ImplementationLoop::new(
        vec![Task {
            id: "T-001".to_string(),
            title: "Task T-001".to_string(),
            spec_text: "spec".to_string(),
            dependencies: Vec::new(),
        }],
        state_store.clone(),
        phases,
        Arc::new(FlakyAgent { calls: calls.clone() }),
        coordinator.clone(),
        git,
        None,
        config,
    )
    .unwrap();

    let outcome = implementation.run("run-2", CancellationToken::new()).await.unwrap();
    assert!(matches!(
        outcome,
        LoopOutcome::PhaseComplete {
            tasks_completed: 1,
            ..
        }
    ));
    assert_eq!(state_store.get("T-001"), TaskStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // The coordinator cleared the provider on the successful retry.
    assert_eq!(coordinator.should_wait("anthropic"), Duration::ZERO);
    assert!(!coordinator.is_limited("anthropic"));
}
