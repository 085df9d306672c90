//! `raven status` (§6): per-phase progress.

use raven_core::task::{discover_tasks, PhaseConfig, TaskSelector, TaskStateStore};

use crate::context::CliContext;

pub fn run(ctx: &CliContext, phase_id: Option<i64>, json: bool, verbose: bool) -> i32 {
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
    let progress = selector.all_progress();

    if json {
        let body = if let Some(id) = phase_id {
            serde_json::json!({ "phase": id, "progress": progress.get(&id) })
        } else {
            serde_json::json!({ "phases": progress })
        };
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        return super::EXIT_OK;
    }

    print_phases(&phases, &progress, phase_id, verbose, &tasks, &state);
    super::EXIT_OK
}

fn print_phases(
    phases: &PhaseConfig,
    progress: &std::collections::HashMap<i64, raven_core::task::PhaseProgress>,
    only: Option<i64>,
    verbose: bool,
    tasks: &[raven_core::task::Task],
    state: &TaskStateStore,
) {
    for phase in phases.phases() {
        if let Some(only) = only {
            if phase.id != only {
                continue;
            }
        }
        let p = progress.get(&phase.id).copied().unwrap_or_default();
        println!(
            "Phase {} — {}: {}/{} completed ({} in_progress, {} blocked, {} skipped, {} not_started)",
            phase.id, phase.name, p.completed, p.total, p.in_progress, p.blocked, p.skipped, p.not_started
        );
        if verbose {
            for task in tasks {
                if phase.contains_task(&task.id) {
                    println!("    {} [{}] {}", task.id, state.get(&task.id), task.title);
                }
            }
        }
    }
}
