//! `raven implement` (§6, §4.6): run the implementation loop.

use raven_core::events::EventBus;
use raven_core::implement::{ImplementationLoop, LoopConfig, LoopOutcome};
use raven_core::task::discover_tasks;

use crate::context::CliContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &CliContext,
    agent_name: &str,
    phase: Option<i64>,
    task: Option<String>,
    max_iterations: Option<u32>,
    max_limit_waits: Option<u32>,
    sleep: Option<u64>,
    model: Option<String>,
) -> i32 {
    if phase.is_some() && task.is_some() {
        eprintln!("--phase and --task are mutually exclusive");
        return super::EXIT_ERROR;
    }

    let tasks = match discover_tasks(&ctx.tasks_dir()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("discovering tasks: {e}");
            return super::EXIT_ERROR;
        }
    };
    let state_store = match ctx.state_store() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("loading task state: {e}");
            return super::EXIT_ERROR;
        }
    };
    let phases = match ctx.phase_config() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("loading phases: {e}");
            return super::EXIT_ERROR;
        }
    };

    let registry = ctx.agent_registry();
    let agent = registry.resolve(agent_name);
    if let Err(e) = agent.check_prerequisites() {
        eprintln!("{e}");
        return super::EXIT_ERROR;
    }

    let task_range = task.as_deref().and_then(|id| {
        raven_core::task::Task::id_number(id).map(|n| (n, n))
    });
    if task.is_some() && task_range.is_none() {
        eprintln!("--task must be a T-NNN id");
        return super::EXIT_ERROR;
    }

    let mut config = LoopConfig {
        phase_id: phase,
        task_range,
        project_name: ctx.config.resolved.project.name.clone(),
        project_language: ctx.config.resolved.project.language.clone(),
        verification_commands: ctx.config.resolved.project.verification_commands.clone(),
        max_iterations: max_iterations.unwrap_or(ctx.config.resolved.max_iterations),
        model,
        checkpoint_dir: Some(ctx.checkpoint_dir()),
        ..LoopConfig::default()
    };
    if let Some(secs) = sleep {
        config.sleep_between_tasks = std::time::Duration::from_secs(secs);
    }

    let coordinator = {
        let waits = max_limit_waits.unwrap_or(ctx.config.resolved.max_limit_waits);
        std::sync::Arc::new(raven_core::rate_limit::RateLimitCoordinator::new(
            raven_core::rate_limit::BackoffPolicy {
                max_waits: waits,
                ..Default::default()
            },
        ))
    };

    let (events, mut receiver) = EventBus::with_default_capacity();
    let consumer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            tracing::info!(kind = ?event.kind, run_id = %event.run_id, "event");
        }
    });

    if ctx.dry_run {
        println!(
            "would run implement: agent={agent_name} phase={phase:?} task={task:?} max_iterations={}",
            config.max_iterations
        );
        drop(events);
        let _ = consumer.await;
        return super::EXIT_OK;
    }

    ctx.spawn_ctrl_c_handler();

    let loop_engine = match ImplementationLoop::new(
        tasks,
        state_store,
        phases,
        agent,
        coordinator,
        ctx.git(),
        Some(events.clone()),
        config,
    ) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };

    let run_id = format!("implement-{}", uuid::Uuid::new_v4());
    let outcome = loop_engine.run(run_id, ctx.cancel.clone()).await;
    drop(events);
    let _ = consumer.await;

    match outcome {
        Ok(LoopOutcome::PhaseComplete { tasks_completed, .. }) => {
            println!("phase complete: {tasks_completed} task(s) completed");
            super::EXIT_OK
        }
        Ok(LoopOutcome::Exhausted { tasks_completed }) => {
            println!("no more ready tasks: {tasks_completed} task(s) completed this run");
            super::EXIT_OK
        }
        Ok(LoopOutcome::TaskBlocked { task_id, reason }) => {
            eprintln!("task {task_id} blocked: {reason}");
            super::EXIT_PARTIAL
        }
        Ok(LoopOutcome::Failed { reason }) => {
            eprintln!("implementation loop failed: {reason}");
            super::EXIT_ERROR
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
