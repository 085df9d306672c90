//! Implementation Loop (§4.6): drives agents through a project's tasks
//! one at a time — select a ready task, build its prompt, invoke an
//! agent, detect the outcome, advance state — until a phase (or the
//! whole task list) is exhausted or a task blocks.
//!
//! Grounded on `harness::orchestrator::run_phase`'s loop for
//! the overall select/invoke/advance shape, but rebuilt on top of
//! [`crate::workflow::WorkflowEngine`] driving
//! [`crate::workflow::builtin::implementation_workflow`] rather than a
//! bespoke `while` loop, so the run gets checkpointing, non-blocking
//! events, and panic-safe step execution for free from the generic
//! engine (§4.5, §4.6).

mod handlers;
mod prompt;
mod signal;

pub use prompt::{render_prompt, PromptContext, DEFAULT_PROMPT_TEMPLATE};
pub use signal::{detect_signal, Signal};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::RavenResult;
use crate::events::EventBus;
use crate::git::GitSurface;
use crate::rate_limit::RateLimitCoordinator;
use crate::task::{PhaseConfig, Task, TaskStateStore};
use crate::workflow::builtin::implementation_workflow;
use crate::workflow::{EngineOptions, HandlerRegistry, WorkflowEngine};

use handlers::{AdvanceHandler, DetectHandler, InvokeHandler, LoopShared, PromptHandler, SelectHandler};

/// Configuration for one [`ImplementationLoop::run`] (§4.6 step 0, §4.13
/// project config surface).
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Restrict selection to one phase. Mutually exclusive with
    /// `task_range`; when both are `None` the loop walks every phase in
    /// order.
    pub phase_id: Option<i64>,
    /// Restrict selection to an explicit `T-NNN` numeric range, for
    /// single-task / ad-hoc runs (§4.4 `select_next_in_range`).
    pub task_range: Option<(u32, u32)>,
    pub sleep_between_tasks: Duration,
    /// Selecting the same task this many times in a row with no
    /// recorded progress is treated as a stuck loop and fails the run
    /// rather than spinning forever.
    pub max_stale_repeats: u32,
    /// Backstop against a misconfigured project that never reaches a
    /// terminal state (distinct from the workflow engine's own
    /// `MAX_STEPS_BACKSTOP`, which counts graph steps rather than tasks).
    pub max_iterations: u32,
    pub project_name: String,
    pub project_language: String,
    pub verification_commands: Vec<String>,
    pub model: Option<String>,
    pub large_prompt_threshold: usize,
    /// Overrides [`DEFAULT_PROMPT_TEMPLATE`] when a project configures
    /// `[agents.<name>] prompt_template` (§4.13).
    pub prompt_template: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            phase_id: None,
            task_range: None,
            sleep_between_tasks: Duration::ZERO,
            max_stale_repeats: 3,
            max_iterations: 500,
            project_name: String::new(),
            project_language: String::new(),
            verification_commands: Vec::new(),
            model: None,
            large_prompt_threshold: 32 * 1024,
            prompt_template: None,
            checkpoint_dir: None,
        }
    }
}

/// Why an [`ImplementationLoop::run`] stopped.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    /// The configured phase (or, with no phase configured, every task)
    /// reached `completed`/`skipped`.
    PhaseComplete {
        phase_id: Option<i64>,
        tasks_completed: usize,
    },
    /// No phase was configured and no ready task remained, but the
    /// overall task list is not complete — some tasks are still
    /// `blocked` or waiting on unmet dependencies outside the walked
    /// phases.
    Exhausted { tasks_completed: usize },
    /// An agent emitted `TASK_BLOCKED`; the loop stops rather than
    /// retrying, since a blocked task needs human input (§4.6).
    TaskBlocked { task_id: String, reason: String },
    /// The run reached `__failed__` without emitting a Raven error the
    /// caller can inspect directly (e.g. a step handler panic).
    Failed { reason: String },
}

/// Drives agents through a project's tasks per §4.6.
pub struct ImplementationLoop {
    shared: Arc<LoopShared>,
    engine: WorkflowEngine,
}

impl ImplementationLoop {
    pub fn new(
        tasks: Vec<Task>,
        state_store: Arc<TaskStateStore>,
        phases: PhaseConfig,
        agent: Arc<dyn Agent>,
        coordinator: Arc<RateLimitCoordinator>,
        git: GitSurface,
        events: Option<EventBus>,
        config: LoopConfig,
    ) -> RavenResult<Self> {
        let checkpoint_dir = config.checkpoint_dir.clone();
        let events_for_engine = events.clone();
        let shared = Arc::new(LoopShared::new(
            tasks,
            state_store,
            phases,
            agent,
            coordinator,
            git,
            events,
            config,
        ));

        let mut registry = HandlerRegistry::new();
        registry.register("select", Arc::new(SelectHandler(shared.clone())));
        registry.register("prompt", Arc::new(PromptHandler(shared.clone())));
        registry.register("invoke", Arc::new(InvokeHandler(shared.clone())));
        registry.register("detect", Arc::new(DetectHandler(shared.clone())));
        registry.register("advance", Arc::new(AdvanceHandler(shared.clone())));

        let engine = WorkflowEngine::new(
            implementation_workflow()?,
            registry,
            EngineOptions {
                checkpoint_dir,
                events: events_for_engine,
            },
        );

        Ok(Self { shared, engine })
    }

    /// Drive the loop to completion (or cancellation).
    pub async fn run(&self, run_id: impl Into<String>, cancel: CancellationToken) -> RavenResult<LoopOutcome> {
        let result = self
            .engine
            .run(run_id, cancel, std::collections::HashMap::new())
            .await?;

        if let Some(outcome) = self.shared.take_outcome() {
            return Ok(outcome);
        }

        if result.succeeded {
            Ok(LoopOutcome::Exhausted {
                tasks_completed: self.shared.tasks_completed(),
            })
        } else {
            let reason = result
                .state
                .step_history
                .last()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "implementation workflow reached __failed__".to_string());
            Ok(LoopOutcome::Failed { reason })
        }
    }

    /// Resume a previously-checkpointed run.
    pub async fn resume(&self, run_id: &str, cancel: CancellationToken) -> RavenResult<LoopOutcome> {
        let result = self.engine.resume(run_id, cancel).await?;
        if let Some(outcome) = self.shared.take_outcome() {
            return Ok(outcome);
        }
        if result.succeeded {
            Ok(LoopOutcome::Exhausted {
                tasks_completed: self.shared.tasks_completed(),
            })
        } else {
            let reason = result
                .state
                .step_history
                .last()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "implementation workflow reached __failed__".to_string());
            Ok(LoopOutcome::Failed { reason })
        }
    }

    pub async fn dry_run(&self, run_id: impl Into<String>) -> RavenResult<Vec<String>> {
        self.engine.dry_run(run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DryRunCommand, RateLimitInfo, RunOpts, RunResult};
    use crate::task::{TaskStatus};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct AlwaysCleanAgent;

    #[async_trait]
    impl Agent for AlwaysCleanAgent {
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
                stdout: "no signal here, task done".to_string(),
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

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            spec_text: format!("spec for {id}"),
            dependencies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn runs_every_task_in_a_phase_to_completion() {
        let dir = tempdir().unwrap();
        let state_store = Arc::new(TaskStateStore::load(dir.path().join("task-state.conf")).unwrap());
        let phases = PhaseConfig::parse("1|Core|T-001|T-002\n").unwrap();
        let coordinator = Arc::new(RateLimitCoordinator::default());
        let git = GitSurface::new(dir.path());

        let config = LoopConfig {
            phase_id: Some(1),
            ..Default::default()
        };
        let implementation = ImplementationLoop::new(
            vec![task("T-001"), task("T-002")],
            state_store.clone(),
            phases,
            Arc::new(AlwaysCleanAgent),
            coordinator,
            git,
            None,
            config,
        )
        .unwrap();

        let outcome = implementation
            .run("run-1", CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::PhaseComplete { tasks_completed: 2, .. }));
        assert_eq!(state_store.get("T-001"), TaskStatus::Completed);
        assert_eq!(state_store.get("T-002"), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn empty_task_list_reports_phase_complete_immediately() {
        let dir = tempdir().unwrap();
        let state_store = Arc::new(TaskStateStore::load(dir.path().join("task-state.conf")).unwrap());
        let phases = PhaseConfig::parse("1|Core|T-001|T-002\n").unwrap();
        let coordinator = Arc::new(RateLimitCoordinator::default());
        let git = GitSurface::new(dir.path());

        let config = LoopConfig {
            phase_id: Some(1),
            ..Default::default()
        };
        let implementation = ImplementationLoop::new(
            vec![],
            state_store,
            phases,
            Arc::new(AlwaysCleanAgent),
            coordinator,
            git,
            None,
            config,
        )
        .unwrap();

        let outcome = implementation
            .run("run-2", CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, LoopOutcome::PhaseComplete { tasks_completed: 0, .. }));
    }

    #[tokio::test]
    async fn dry_run_lists_every_step_without_side_effects() {
        let dir = tempdir().unwrap();
        let state_store = Arc::new(TaskStateStore::load(dir.path().join("task-state.conf")).unwrap());
        let phases = PhaseConfig::parse("1|Core|T-001|T-002\n").unwrap();
        let coordinator = Arc::new(RateLimitCoordinator::default());
        let git = GitSurface::new(dir.path());
        let implementation = ImplementationLoop::new(
            vec![task("T-001")],
            state_store.clone(),
            phases,
            Arc::new(AlwaysCleanAgent),
            coordinator,
            git,
            None,
            LoopConfig::default(),
        )
        .unwrap();

        let lines = implementation.dry_run("run-3").await.unwrap();
        assert!(lines.iter().any(|l| l.starts_with("select:")));
        assert_eq!(state_store.get("T-001"), TaskStatus::NotStarted);
    }
}
