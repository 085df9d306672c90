//! Workflow Engine: runs a step graph as a state machine with
//! checkpointing, non-blocking event emission, dry-run, and panic-safe
//! step execution (§4.5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};

use super::definition::{is_terminal_step, TransitionEvent, WorkflowDefinition, DONE_STEP};
use super::registry::{HandlerRegistry, StepContext};
use super::state::WorkflowState;

/// Safety backstop against a misconfigured graph that never reaches a
/// terminal step. Not part of the spec's contract; cycles themselves are
/// explicitly permitted (§3, §4.5) and do not trip this on their own as
/// long as a handler eventually steers the run to `__done__`/`__failed__`.
const MAX_STEPS_BACKSTOP: usize = 10_000;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// When set, the engine persists `WorkflowState` to this directory
    /// after every transition.
    pub checkpoint_dir: Option<PathBuf>,
    pub events: Option<EventBus>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            checkpoint_dir: None,
            events: None,
        }
    }
}

/// Outcome of driving a run to a terminal step: the final persisted state
/// plus a simple success classification for callers that don't want to
/// inspect `current_step` themselves.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub state: WorkflowState,
    pub succeeded: bool,
}

impl StepResult {
    fn from_state(state: WorkflowState) -> Self {
        let succeeded = state.succeeded();
        Self { state, succeeded }
    }
}

pub struct WorkflowEngine {
    definition: WorkflowDefinition,
    registry: HandlerRegistry,
    options: EngineOptions,
}

impl WorkflowEngine {
    pub fn new(definition: WorkflowDefinition, registry: HandlerRegistry, options: EngineOptions) -> Self {
        Self {
            definition,
            registry,
            options,
        }
    }

    fn emit(&self, run_id: &str, kind: EventKind) {
        if let Some(bus) = &self.options.events {
            bus.emit(Event::new(run_id, kind));
        }
    }

    fn checkpoint(&self, state: &WorkflowState) -> RavenResult<()> {
        if let Some(dir) = &self.options.checkpoint_dir {
            state.save(dir)?;
            self.emit(
                &state.id,
                EventKind::Checkpoint {
                    step: state.current_step.clone(),
                },
            );
        }
        Ok(())
    }

    /// Start a fresh run and drive it to completion.
    pub async fn run(
        &self,
        run_id: impl Into<String>,
        cancel: CancellationToken,
        metadata: HashMap<String, Value>,
    ) -> RavenResult<StepResult> {
        let run_id = run_id.into();
        let mut state = WorkflowState::new(&run_id, &self.definition.name, &self.definition.initial_step);
        state.metadata = metadata;
        self.emit(
            &run_id,
            EventKind::WorkflowStarted {
                workflow_name: self.definition.name.clone(),
            },
        );
        self.drive(&mut state, cancel).await?;
        Ok(StepResult::from_state(state))
    }

    /// Resume a previously-checkpointed run from disk.
    pub async fn resume(&self, run_id: &str, cancel: CancellationToken) -> RavenResult<StepResult> {
        let dir = self
            .options
            .checkpoint_dir
            .as_ref()
            .ok_or_else(|| RavenError::InvalidInput("resume requires a checkpoint_dir".into()))?;
        let mut state = WorkflowState::load(dir, run_id)?;
        if state.is_terminal() {
            return Ok(StepResult::from_state(state));
        }
        self.emit(
            run_id,
            EventKind::WorkflowResumed {
                step: state.current_step.clone(),
            },
        );
        self.drive(&mut state, cancel).await?;
        Ok(StepResult::from_state(state))
    }

    async fn drive(&self, state: &mut WorkflowState, cancel: CancellationToken) -> RavenResult<()> {
        let mut steps_run = 0usize;
        while !is_terminal_step(&state.current_step) {
            if cancel.is_cancelled() {
                return Err(RavenError::Cancelled);
            }
            steps_run += 1;
            if steps_run > MAX_STEPS_BACKSTOP {
                return Err(RavenError::InvalidInput(format!(
                    "workflow '{}' exceeded {MAX_STEPS_BACKSTOP} steps without reaching a terminal step",
                    self.definition.name
                )));
            }
            self.step_once(state, &cancel).await?;
        }

        if state.current_step == DONE_STEP {
            self.emit(&state.id, EventKind::WorkflowCompleted);
        } else {
            self.emit(
                &state.id,
                EventKind::WorkflowFailed {
                    reason: state
                        .step_history
                        .last()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "workflow reached __failed__".to_string()),
                },
            );
        }
        Ok(())
    }

    async fn step_once(&self, state: &mut WorkflowState, cancel: &CancellationToken) -> RavenResult<()> {
        let current = state.current_step.clone();
        let handler = self.registry.get(&current)?;
        let ctx = StepContext {
            run_id: state.id.clone(),
            step: current.clone(),
            metadata: state.metadata.clone(),
            cancel: cancel.clone(),
        };

        self.emit(&state.id, EventKind::StepStarted { step: current.clone() });
        let started = Instant::now();
        let started_at = Utc::now();

        // Run the handler inside a spawned task so a panic inside it is
        // caught as a JoinError rather than unwinding the engine itself
        // (§4.5 step 2, §9: "exceptions/panics inside step handlers").
        let outcome = tokio::spawn(async move { handler.execute(&ctx).await }).await;

        let (event, error) = match outcome {
            Ok(Ok(event)) => (event, None),
            Ok(Err(raven_err)) => (TransitionEvent::Failure, Some(raven_err.to_string())),
            Err(join_err) => {
                let message = if join_err.is_cancelled() {
                    "step task was cancelled".to_string()
                } else {
                    format!("step handler panicked: {join_err}")
                };
                (TransitionEvent::Failure, Some(message))
            }
        };

        let next_step = self.definition.resolve_transition(&current, event);
        let duration = started.elapsed();

        state.record_transition(current.clone(), event, started_at, duration, error.clone(), next_step.clone());

        match &error {
            Some(msg) => self.emit(
                &state.id,
                EventKind::StepFailed {
                    step: current.clone(),
                    error: msg.clone(),
                },
            ),
            None => self.emit(
                &state.id,
                EventKind::StepCompleted {
                    step: current.clone(),
                    event: event.to_string(),
                },
            ),
        }

        self.checkpoint(state)?;
        Ok(())
    }

    /// Non-side-effecting walk of the plan: calls `handler.dry_run`
    /// instead of `execute`, no checkpoints, no subprocesses (§4.5).
    pub async fn dry_run(&self, run_id: impl Into<String>) -> RavenResult<Vec<String>> {
        let run_id = run_id.into();
        let mut lines = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(self.definition.initial_step.clone());

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                lines.push(format!("{name}: cycles back to step {name}"));
                continue;
            }
            let Some(step) = self.definition.step(&name) else {
                continue;
            };
            let handler = self.registry.get(&name)?;
            let ctx = StepContext {
                run_id: run_id.clone(),
                step: name.clone(),
                metadata: HashMap::new(),
                cancel: CancellationToken::new(),
            };
            let description = handler.dry_run(&ctx).await;
            lines.push(format!("{name}: {description}"));
            for target in step.transitions.values() {
                if !is_terminal_step(target) && !visited.contains(target) {
                    queue.push_back(target.clone());
                }
            }
        }
        Ok(lines)
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{StepDef, DONE_STEP, FAILED_STEP};
    use crate::workflow::registry::StepHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct CountingSuccess {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StepHandler for CountingSuccess {
        async fn execute(&self, _ctx: &StepContext) -> RavenResult<TransitionEvent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransitionEvent::Success)
        }
    }

    struct AlwaysPanics;

    #[async_trait]
    impl StepHandler for AlwaysPanics {
        async fn execute(&self, _ctx: &StepContext) -> RavenResult<TransitionEvent> {
            panic!("boom");
        }
    }

    fn two_step_definition() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "t",
            "test",
            "a",
            vec![
                StepDef::new("a").on(TransitionEvent::Success, "b"),
                StepDef::new("b").on(TransitionEvent::Success, DONE_STEP),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn completes_through_both_steps_to_done() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(CountingSuccess { calls: calls.clone() }));
        registry.register("b", Arc::new(CountingSuccess { calls: calls.clone() }));

        let engine = WorkflowEngine::new(two_step_definition(), registry, EngineOptions::default());
        let result = engine
            .run("run-1", CancellationToken::new(), HashMap::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.state.current_step, DONE_STEP);
        assert_eq!(result.state.step_history.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_failure_event() {
        let def = WorkflowDefinition::new(
            "t",
            "test",
            "a",
            vec![StepDef::new("a")
                .on(TransitionEvent::Success, DONE_STEP)
                .on(TransitionEvent::Failure, FAILED_STEP)],
        )
        .unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(AlwaysPanics));

        let engine = WorkflowEngine::new(def, registry, EngineOptions::default());
        let result = engine
            .run("run-2", CancellationToken::new(), HashMap::new())
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.state.current_step, FAILED_STEP);
        assert_eq!(result.state.step_history[0].event, TransitionEvent::Failure);
        assert!(result.state.step_history[0].error.as_ref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn checkpoints_after_every_transition() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(CountingSuccess { calls: calls.clone() }));
        registry.register("b", Arc::new(CountingSuccess { calls: calls.clone() }));

        let options = EngineOptions {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            events: None,
        };
        let engine = WorkflowEngine::new(two_step_definition(), registry, options);
        engine
            .run("run-3", CancellationToken::new(), HashMap::new())
            .await
            .unwrap();

        let loaded = WorkflowState::load(dir.path(), "run-3").unwrap();
        assert_eq!(loaded.current_step, DONE_STEP);
    }

    #[tokio::test]
    async fn resume_continues_from_checkpoint() {
        let dir = tempdir().unwrap();
        let mut partial = WorkflowState::new("run-4", "t", "b");
        partial.save(dir.path()).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(CountingSuccess { calls: calls.clone() }));
        registry.register("b", Arc::new(CountingSuccess { calls: calls.clone() }));
        let options = EngineOptions {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            events: None,
        };
        let engine = WorkflowEngine::new(two_step_definition(), registry, options);
        let result = engine.resume("run-4", CancellationToken::new()).await.unwrap();
        assert_eq!(result.state.current_step, DONE_STEP);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resume_of_terminal_run_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut state = WorkflowState::new("run-5", "t", DONE_STEP);
        state.save(dir.path()).unwrap();
        let registry = HandlerRegistry::new();
        let options = EngineOptions {
            checkpoint_dir: Some(dir.path().to_path_buf()),
            events: None,
        };
        let engine = WorkflowEngine::new(two_step_definition(), registry, options);
        let resumed = engine.resume("run-5", CancellationToken::new()).await.unwrap();
        assert_eq!(resumed.state.current_step, DONE_STEP);
    }

    #[tokio::test]
    async fn cancellation_stops_the_drive_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(CountingSuccess { calls: calls.clone() }));
        registry.register("b", Arc::new(CountingSuccess { calls: calls.clone() }));
        let engine = WorkflowEngine::new(two_step_definition(), registry, EngineOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine.run("run-6", cancel, HashMap::new()).await;
        assert!(matches!(result, Err(RavenError::Cancelled)));
    }
}
