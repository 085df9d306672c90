//! `raven dashboard` (§6): the interactive TUI itself is out of scope
//! for this crate (§1); this prints the data it would render.

use raven_core::task::{discover_tasks, TaskSelector};

use crate::context::CliContext;

pub fn run(ctx: &CliContext) -> i32 {
    let tasks = match discover_tasks(&ctx.tasks_dir()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("discovering tasks: {e}");
            return super::EXIT_ERROR;
        }
    };
    let state = match ctx.state_store() {
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

    let selector = TaskSelector::new(&tasks, &state, &phases);
    let dir = ctx.checkpoint_dir();
    let active_runs = raven_core::workflow::WorkflowState::list_run_ids(&dir).unwrap_or_default();

    println!("raven dashboard (non-interactive; the TUI frontend lives outside this crate)\n");
    println!("project: {}", ctx.config.resolved.project.name);
    println!("phases:");
    for phase in phases.phases() {
        let p = selector.phase_progress(phase);
        println!(
            "  {:>3}  {:<24} {}/{} completed",
            phase.id, phase.name, p.completed, p.total
        );
    }
    println!("blocked tasks: {}", selector.blocked_tasks().len());
    println!("persisted runs: {}", active_runs.len());
    for run_id in &active_runs {
        println!("  - {run_id}");
    }

    super::EXIT_OK
}
