//! End-to-end: an unexpectedly dirty working tree is stashed before
//! invoking the agent and restored once the tree is clean again (spec
//! §8 scenario 5 — "Dirty tree is auto-stashed").
//!
//! A tracked file carries an uncommitted edit before the loop starts.
//! `InvokeHandler` must stash it before the agent runs; `AdvanceHandler`
//! must pop it back once the task completes and the tree is clean.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use raven_core::agent::{Agent, DryRunCommand, RateLimitInfo, RunOpts, RunResult};
use raven_core::error::RavenResult;
use raven_core::events::{EventBus, EventKind};
use raven_core::git::GitSurface;
use raven_core::implement::{ImplementationLoop, LoopConfig, LoopOutcome};
use raven_core::rate_limit::RateLimitCoordinator;
use raven_core::task::{PhaseConfig, Task, TaskStateStore, TaskStatus};

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git invocation failed");
    assert!(status.success(), "git {args:?} failed");
}

struct ScriptedAgent;

#[async_trait]
impl Agent for ScriptedAgent {
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
        Ok(RunResult {
            stdout: "work done, no signal here".to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(1),
            rate_limit: None,
        })
    }
    fn parse_rate_limit(&self, _output: &str) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}

#[tokio::test]
async fn dirty_tree_is_stashed_before_invoke_and_restored_after() {
    let dir = tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    std::fs::write(dir.path().join("work.txt"), "base\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "base"]);

    // Leave a tracked, uncommitted edit sitting in the tree before the
    // loop starts.
    std::fs::write(dir.path().join("work.txt"), "base\nunrelated edit\n").unwrap();

    let state_store = Arc::new(TaskStateStore::load(dir.path().join("task-state.conf")).unwrap());
    let phases = PhaseConfig::parse("1|Core|T-001|T-001\n").unwrap();
    let coordinator = Arc::new(RateLimitCoordinator::default());
    let git_surface = GitSurface::new(dir.path());
    let (bus, mut rx) = EventBus::with_default_capacity();

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
        Arc::new(ScriptedAgent),
        coordinator,
        git_surface,
        Some(bus),
        config,
    )
    .unwrap();

    let outcome = implementation.run("run-3", CancellationToken::new()).await.unwrap();
    assert!(matches!(
        outcome,
        LoopOutcome::PhaseComplete {
            tasks_completed: 1,
            ..
        }
    ));
    assert_eq!(state_store.get("T-001"), TaskStatus::Completed);

    let mut saw_stash_created = false;
    let mut saw_stash_restored = false;
    let mut saw_task_completed = false;
    while let Some(event) = rx.try_recv() {
        match event.kind {
            EventKind::StashCreated { task_id, .. } => {
                assert_eq!(task_id, "T-001");
                saw_stash_created = true;
                assert!(!saw_task_completed, "stash must be created before the task completes");
            }
            EventKind::TaskCompleted { .. } => saw_task_completed = true,
            EventKind::StashRestored { task_id } => {
                assert_eq!(task_id, "T-001");
                saw_stash_restored = true;
                assert!(saw_stash_created, "stash must be restored after it was created");
            }
            _ => {}
        }
    }
    assert!(saw_stash_created, "expected a StashCreated event");
    assert!(saw_stash_restored, "expected a StashRestored event");

    // The original, pre-agent edit is back in the working tree and the
    // stash list is empty.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("work.txt")).unwrap(),
        "base\nunrelated edit\n"
    );
    let stash_list = Command::new("git")
        .args(["stash", "list"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(stash_list.stdout.is_empty());
}
