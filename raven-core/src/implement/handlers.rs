//! Step handlers for the `implementation` workflow (§4.6), wired onto
//! [`crate::workflow::builtin::implementation_workflow`]'s five-step
//! graph: `select -> prompt -> invoke -> detect -> advance`.
//!
//! The generic [`crate::workflow::WorkflowEngine`] only threads a
//! `HashMap<String, Value>` of metadata between steps, which is too thin
//! for this loop's working set (the task list, state store, current
//! prompt, last agent result). Each handler instead closes over a shared
//! [`LoopState`] behind a `Mutex`, following the same "handlers share
//! context, not the generic metadata bag" shape as
//! `harness::orchestrator` step functions closing over an `Arc<Session>`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, OutputFormat, RunOpts};
use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};
use crate::git::GitSurface;
use crate::rate_limit::RateLimitCoordinator;
use crate::task::{PhaseConfig, Task, TaskSelector, TaskStateStore, TaskStatus};
use crate::workflow::{StepContext, StepHandler, TransitionEvent};

use super::prompt::{render_prompt, PromptContext, DEFAULT_PROMPT_TEMPLATE};
use super::signal::{detect_signal, Signal};
use super::{LoopConfig, LoopOutcome};

/// Mutable working set shared by every step handler across the run. Only
/// one step executes at a time (the engine drives steps sequentially),
/// so the mutex is never contended; it exists to satisfy `Send + Sync`
/// across the `tokio::spawn` boundary each step runs inside.
pub(super) struct LoopState {
    pub current_task_id: Option<String>,
    pub current_prompt: String,
    pub last_stdout: String,
    pub last_stderr: String,
    pub detected_signal: Option<Signal>,
    pub stash_active: bool,
    pub last_selected: Option<String>,
    pub stale_repeats: u32,
    pub iterations: u32,
    pub tasks_completed: usize,
    pub outcome: Option<LoopOutcome>,
}

impl LoopState {
    fn new() -> Self {
        Self {
            current_task_id: None,
            current_prompt: String::new(),
            last_stdout: String::new(),
            last_stderr: String::new(),
            detected_signal: None,
            stash_active: false,
            last_selected: None,
            stale_repeats: 0,
            iterations: 0,
            tasks_completed: 0,
            outcome: None,
        }
    }
}

/// Shared, read-mostly resources every handler needs.
pub(super) struct LoopShared {
    pub tasks: Vec<Task>,
    pub state_store: Arc<TaskStateStore>,
    pub phases: PhaseConfig,
    pub agent: Arc<dyn Agent>,
    pub coordinator: Arc<RateLimitCoordinator>,
    pub git: GitSurface,
    pub events: Option<EventBus>,
    pub config: LoopConfig,
    pub loop_state: Mutex<LoopState>,
}

impl LoopShared {
    pub fn new(
        tasks: Vec<Task>,
        state_store: Arc<TaskStateStore>,
        phases: PhaseConfig,
        agent: Arc<dyn Agent>,
        coordinator: Arc<RateLimitCoordinator>,
        git: GitSurface,
        events: Option<EventBus>,
        config: LoopConfig,
    ) -> Self {
        Self {
            tasks,
            state_store,
            phases,
            agent,
            coordinator,
            git,
            events,
            config,
            loop_state: Mutex::new(LoopState::new()),
        }
    }

    fn selector(&self) -> TaskSelector<'_> {
        TaskSelector::new(&self.tasks, &self.state_store, &self.phases)
    }

    fn emit(&self, run_id: &str, kind: EventKind) {
        if let Some(bus) = &self.events {
            bus.emit(Event::new(run_id, kind));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.loop_state.lock().expect("implementation loop state poisoned")
    }

    /// Take the final outcome recorded by a handler, if any was set
    /// before the run reached a terminal step.
    pub fn take_outcome(&self) -> Option<LoopOutcome> {
        self.lock().outcome.take()
    }

    pub fn tasks_completed(&self) -> usize {
        self.lock().tasks_completed
    }
}

pub(super) struct SelectHandler(pub Arc<LoopShared>);
pub(super) struct PromptHandler(pub Arc<LoopShared>);
pub(super) struct InvokeHandler(pub Arc<LoopShared>);
pub(super) struct DetectHandler(pub Arc<LoopShared>);
pub(super) struct AdvanceHandler(pub Arc<LoopShared>);

#[async_trait]
impl StepHandler for SelectHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        {
            let mut state = shared.lock();
            state.iterations += 1;
            if state.iterations > shared.config.max_iterations {
                return Err(RavenError::InvalidInput(format!(
                    "implementation loop exceeded {} iterations without reaching a terminal state",
                    shared.config.max_iterations
                )));
            }
        }

        let selector = shared.selector();

        let picked = match (shared.config.phase_id, shared.config.task_range) {
            (Some(phase_id), _) => {
                let phase = shared
                    .phases
                    .phase_by_id(phase_id)
                    .ok_or_else(|| RavenError::InvalidInput(format!("no phase with id {phase_id}")))?;
                selector.select_next(phase).map(|t| t.id.clone())
            }
            (None, Some((start, end))) => selector
                .select_next_in_range(start, end)
                .map(|t| t.id.clone()),
            (None, None) => shared
                .phases
                .phases()
                .iter()
                .find_map(|phase| selector.select_next(phase))
                .map(|t| t.id.clone()),
        };

        let Some(task_id) = picked else {
            let phase_complete = match shared.config.phase_id {
                Some(phase_id) => shared
                    .phases
                    .phase_by_id(phase_id)
                    .map(|phase| selector.is_phase_complete(phase))
                    .unwrap_or(true),
                None => true,
            };
            let mut state = shared.lock();
            state.outcome = Some(if phase_complete {
                LoopOutcome::PhaseComplete {
                    phase_id: shared.config.phase_id,
                    tasks_completed: state.tasks_completed,
                }
            } else {
                LoopOutcome::Exhausted {
                    tasks_completed: state.tasks_completed,
                }
            });
            if phase_complete {
                shared.emit(
                    &ctx.run_id,
                    EventKind::PhaseComplete {
                        phase: shared.config.phase_id.unwrap_or(0),
                    },
                );
            }
            return Ok(TransitionEvent::Blocked);
        };

        {
            let mut state = shared.lock();
            if state.last_selected.as_deref() == Some(task_id.as_str()) {
                state.stale_repeats += 1;
            } else {
                state.stale_repeats = 0;
            }
            state.last_selected = Some(task_id.clone());
            if state.stale_repeats >= shared.config.max_stale_repeats {
                return Err(RavenError::InvalidInput(format!(
                    "task '{task_id}' selected {} times in a row without progress",
                    state.stale_repeats + 1
                )));
            }
            state.current_task_id = Some(task_id.clone());
        }

        shared
            .state_store
            .update(&task_id, TaskStatus::InProgress, Some(shared.agent.name().to_string()), None)?;
        shared.emit(&ctx.run_id, EventKind::TaskSelected { task_id });
        Ok(TransitionEvent::Success)
    }
}

#[async_trait]
impl StepHandler for PromptHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let task_id = shared
            .lock()
            .current_task_id
            .clone()
            .ok_or_else(|| RavenError::InvalidInput("prompt step ran with no selected task".into()))?;

        let selector = shared.selector();
        let task = selector
            .select_by_id(&task_id)
            .ok_or_else(|| RavenError::NotFound(format!("task '{task_id}' disappeared from the task list")))?;
        let phase = shared.phases.phase_for_task(&task_id);

        let prompt_ctx = PromptContext {
            task_spec: task.spec_text.clone(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            phase_id: phase.map(|p| p.id).unwrap_or(0),
            phase_name: phase.map(|p| p.name.clone()).unwrap_or_default(),
            phase_range: phase
                .map(|p| format!("{}..{}", p.first_task_id, p.last_task_id))
                .unwrap_or_default(),
            project_name: shared.config.project_name.clone(),
            project_language: shared.config.project_language.clone(),
            verification_commands: shared.config.verification_commands.clone(),
            completed_task_ids: selector.completed_task_ids(),
            remaining_task_ids: selector.remaining_task_ids(),
            agent_name: shared.agent.name().to_string(),
            model: shared.config.model.clone().unwrap_or_else(|| "default".to_string()),
        };

        let template = shared
            .config
            .prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE);
        let rendered = render_prompt(template, &prompt_ctx);
        shared.lock().current_prompt = rendered;
        let _ = ctx;
        Ok(TransitionEvent::Success)
    }
}

#[async_trait]
impl StepHandler for InvokeHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let provider = crate::agent::provider_for_agent(shared.agent.name()).to_string();

        if shared.coordinator.exceeded_max_waits(&provider) {
            let waits = shared.coordinator.snapshot(&provider).wait_count;
            return Err(RavenError::MaxWaitsExceeded { provider, waits });
        }

        shared
            .coordinator
            .wait_for_reset(&ctx.cancel, &provider, &ctx.run_id, shared.events.as_ref())
            .await?;

        let task_id = shared
            .lock()
            .current_task_id
            .clone()
            .ok_or_else(|| RavenError::InvalidInput("invoke step ran with no selected task".into()))?;

        if shared.git.has_uncommitted_changes(&ctx.cancel).await.unwrap_or(false) {
            let mut state = shared.lock();
            if !state.stash_active {
                drop(state);
                shared
                    .git
                    .stash(&ctx.cancel, &format!("raven: auto-stash before {task_id}"))
                    .await?;
                shared.emit(
                    &ctx.run_id,
                    EventKind::StashCreated {
                        task_id: task_id.clone(),
                        message: "unexpected dirty working tree before agent invocation".to_string(),
                    },
                );
                shared.lock().stash_active = true;
            }
        }

        let prompt = shared.lock().current_prompt.clone();
        shared.emit(
            &ctx.run_id,
            EventKind::AgentStarted {
                agent: shared.agent.name().to_string(),
                task_id: Some(task_id.clone()),
            },
        );

        let mut opts = RunOpts::new(shared.git.working_dir()).with_prompt(prompt);
        opts.model = shared.config.model.clone();
        opts.output_format = OutputFormat::StreamJson;
        opts.stream_events = shared.events.clone();
        opts.large_prompt_threshold = shared.config.large_prompt_threshold;

        let started = std::time::Instant::now();
        let result = shared.agent.run(ctx.cancel.clone(), opts).await?;
        shared.emit(
            &ctx.run_id,
            EventKind::AgentCompleted {
                agent: shared.agent.name().to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );

        if let Some(info) = &result.rate_limit {
            if info.is_limited {
                shared.coordinator.record(&provider, info.reset_after, &info.message);
                shared.emit(
                    &ctx.run_id,
                    EventKind::RateLimitRecorded {
                        provider: provider.clone(),
                        wait_secs: info.reset_after.as_secs_f64(),
                    },
                );
                return Ok(TransitionEvent::RateLimited);
            }
        }

        shared.coordinator.clear(&provider);

        if !result.succeeded() {
            return Err(RavenError::subprocess_failed(
                format!("{} run", shared.agent.name()),
                Some(result.exit_code),
                if result.stderr.is_empty() {
                    result.stdout.clone()
                } else {
                    result.stderr.clone()
                },
            ));
        }

        {
            let mut state = shared.lock();
            state.last_stdout = result.stdout;
            state.last_stderr = result.stderr;
        }
        Ok(TransitionEvent::Success)
    }
}

#[async_trait]
impl StepHandler for DetectHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let (stdout, stderr) = {
            let state = shared.lock();
            (state.last_stdout.clone(), state.last_stderr.clone())
        };
        let signal = detect_signal(&stdout, &stderr);

        let event = match &signal {
            Some(Signal::RavenError { reason }) => {
                shared.lock().detected_signal = signal.clone();
                return Err(RavenError::InvalidInput(format!(
                    "agent reported RAVEN_ERROR: {reason}"
                )));
            }
            Some(Signal::TaskBlocked { .. }) => TransitionEvent::Blocked,
            Some(Signal::PhaseComplete) => TransitionEvent::Partial,
            None => TransitionEvent::Success,
        };
        shared.lock().detected_signal = signal;
        let _ = ctx;
        Ok(event)
    }
}

#[async_trait]
impl StepHandler for AdvanceHandler {
    async fn execute(&self, ctx: &StepContext) -> RavenResult<TransitionEvent> {
        let shared = &self.0;
        let task_id = shared
            .lock()
            .current_task_id
            .clone()
            .ok_or_else(|| RavenError::InvalidInput("advance step ran with no selected task".into()))?;
        let signal = shared.lock().detected_signal.take();

        match signal {
            Some(Signal::TaskBlocked { reason }) => {
                shared
                    .state_store
                    .update(&task_id, TaskStatus::Blocked, Some(shared.agent.name().to_string()), Some(reason.clone()))?;
                shared.emit(
                    &ctx.run_id,
                    EventKind::TaskBlocked {
                        task_id: task_id.clone(),
                        reason: reason.clone(),
                    },
                );
                shared.lock().outcome = Some(LoopOutcome::TaskBlocked { task_id, reason });
                return Ok(TransitionEvent::Blocked);
            }
            Some(Signal::PhaseComplete) | None => {
                shared
                    .state_store
                    .update(&task_id, TaskStatus::Completed, Some(shared.agent.name().to_string()), None)?;
                shared.emit(&ctx.run_id, EventKind::TaskCompleted { task_id: task_id.clone() });
                shared.lock().tasks_completed += 1;
            }
            Some(Signal::RavenError { .. }) => unreachable!("RAVEN_ERROR is short-circuited in detect"),
        }

        // Pop an outstanding auto-stash once the tree is clean again
        // (§4.6: "stash when unexpectedly dirty, pop on the next clean
        // iteration").
        if shared.lock().stash_active
            && !shared.git.has_uncommitted_changes(&ctx.cancel).await.unwrap_or(true)
        {
            shared.git.stash_pop(&ctx.cancel).await?;
            shared.emit(&ctx.run_id, EventKind::StashRestored { task_id: task_id.clone() });
            shared.lock().stash_active = false;
        }

        let selector = shared.selector();
        if let Some(phase_id) = shared.config.phase_id {
            if let Some(phase) = shared.phases.phase_by_id(phase_id) {
                if selector.is_phase_complete(phase) {
                    shared.emit(&ctx.run_id, EventKind::PhaseComplete { phase: phase_id });
                    let tasks_completed = shared.lock().tasks_completed;
                    shared.lock().outcome = Some(LoopOutcome::PhaseComplete {
                        phase_id: Some(phase_id),
                        tasks_completed,
                    });
                    return Ok(TransitionEvent::Blocked);
                }
            }
        }

        if !shared.config.sleep_between_tasks.is_zero() {
            let sleep = shared.config.sleep_between_tasks;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(RavenError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        Ok(TransitionEvent::Success)
    }
}
