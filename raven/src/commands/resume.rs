//! `raven resume` (§6, §4.5): list, resume, or clean persisted workflow
//! runs.
//!
//! §9 Open Question ("what happens if a stored run is already
//! terminal"): resolved as warn-and-skip — a run that already reached
//! `__done__`/`__failed__` is not re-executed, since the engine has no
//! well-defined "redo a finished run" semantics.

use raven_core::implement::{ImplementationLoop, LoopConfig};
use raven_core::pipeline::{PhasePlan, PipelineContext, PipelineOrchestrator, PipelinePlan};
use raven_core::task::discover_tasks;
use raven_core::workflow::WorkflowState;

use crate::context::CliContext;

pub async fn run(ctx: &CliContext, run_id: Option<String>, list: bool, clean: bool, clean_all: bool) -> i32 {
    let dir = ctx.checkpoint_dir();

    if list {
        return list_runs(&dir);
    }
    if clean_all {
        return clean_terminal_runs(&dir);
    }
    if clean {
        let Some(id) = run_id else {
            eprintln!("--clean requires --run <id>");
            return super::EXIT_ERROR;
        };
        return clean_one(&dir, &id);
    }

    let Some(id) = run_id else {
        eprintln!("specify --run <id>, or --list to see available runs");
        return super::EXIT_ERROR;
    };

    let state = match WorkflowState::load(&dir, &id) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("loading run '{id}': {e}");
            return super::EXIT_ERROR;
        }
    };

    if state.is_terminal() {
        println!(
            "run '{id}' already reached a terminal state ({}); not re-running it",
            state.current_step
        );
        return super::EXIT_OK;
    }

    ctx.spawn_ctrl_c_handler();

    match state.workflow_name.as_str() {
        "implementation" => resume_implementation(ctx, &id).await,
        raven_core::pipeline::PIPELINE_WORKFLOW => resume_pipeline(ctx, &id).await,
        other => {
            eprintln!("resuming workflow kind '{other}' is not supported by this command");
            super::EXIT_ERROR
        }
    }
}

fn list_runs(dir: &std::path::Path) -> i32 {
    let ids = match WorkflowState::list_run_ids(dir) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    if ids.is_empty() {
        println!("no persisted runs under {}", dir.display());
        return super::EXIT_OK;
    }
    for id in ids {
        match WorkflowState::load(dir, &id) {
            Ok(state) => println!(
                "{id}  {:<16} step={:<12} terminal={}",
                state.workflow_name,
                state.current_step,
                state.is_terminal()
            ),
            Err(e) => println!("{id}  <unreadable: {e}>"),
        }
    }
    super::EXIT_OK
}

fn clean_one(dir: &std::path::Path, id: &str) -> i32 {
    let path = dir.join(format!("{id}.json"));
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("removed {}", path.display());
            super::EXIT_OK
        }
        Err(e) => {
            eprintln!("removing {}: {e}", path.display());
            super::EXIT_ERROR
        }
    }
}

fn clean_terminal_runs(dir: &std::path::Path) -> i32 {
    let ids = match WorkflowState::list_run_ids(dir) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let mut removed = 0;
    for id in ids {
        if let Ok(state) = WorkflowState::load(dir, &id) {
            if state.is_terminal() {
                let path = dir.join(format!("{id}.json"));
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
    }
    println!("removed {removed} terminal run(s)");
    super::EXIT_OK
}

async fn resume_implementation(ctx: &CliContext, run_id: &str) -> i32 {
    let tasks = match discover_tasks(&ctx.tasks_dir()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let state_store = match ctx.state_store() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let phases = match ctx.phase_config() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let registry = ctx.agent_registry();
    let agent = registry.resolve("claude");

    let config = LoopConfig {
        project_name: ctx.config.resolved.project.name.clone(),
        project_language: ctx.config.resolved.project.language.clone(),
        verification_commands: ctx.config.resolved.project.verification_commands.clone(),
        max_iterations: ctx.config.resolved.max_iterations,
        checkpoint_dir: Some(ctx.checkpoint_dir()),
        ..LoopConfig::default()
    };

    let loop_engine = match ImplementationLoop::new(
        tasks,
        state_store,
        phases,
        agent,
        ctx.coordinator(),
        ctx.git(),
        None,
        config,
    ) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };

    match loop_engine.resume(run_id, ctx.cancel.clone()).await {
        Ok(outcome) => {
            println!("{outcome:?}");
            super::EXIT_OK
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

async fn resume_pipeline(ctx: &CliContext, run_id: &str) -> i32 {
    let tasks = match discover_tasks(&ctx.tasks_dir()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let state_store = match ctx.state_store() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let phases_config = match ctx.phase_config() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let registry = ctx.agent_registry();
    let phase_plans: Vec<PhasePlan> = phases_config
        .phases()
        .iter()
        .map(|p| PhasePlan { id: p.id, name: p.name.clone() })
        .collect();

    let plan = PipelinePlan {
        phases: phase_plans,
        branch_template: ctx.config.resolved.project.branch_template.clone(),
        base_branch: "main".to_string(),
        chain_from_previous: true,
        skip_implement: false,
        skip_review: false,
        skip_pr: false,
        review_agents: vec!["claude".to_string()],
        verification_commands: ctx.config.resolved.project.verification_commands.clone(),
        max_fix_cycles: 3,
    };

    let context = PipelineContext {
        tasks,
        state_store,
        phases: phases_config,
        implement_agent: registry.resolve("claude"),
        review_agents: vec![registry.resolve("claude")],
        pr_agent: registry.resolve("claude"),
        coordinator: ctx.coordinator(),
        git: ctx.git(),
        events: None,
        project_brief: ctx.config.resolved.project.name.clone(),
        review_rules: ctx.config.resolved.review.risk_patterns.join(", "),
        checkpoint_dir: ctx.checkpoint_dir(),
    };

    let orchestrator = PipelineOrchestrator::new(context, plan);
    match orchestrator.run(run_id, ctx.cancel.clone()).await {
        Ok(metadata) => {
            for phase in &metadata.phases {
                println!("phase {} ({}): {:?}", phase.id, phase.name, phase.status);
            }
            super::EXIT_OK
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
