//! `raven pipeline` (§6, §4.9): run the full implement -> review/fix ->
//! pr chain across a phase sequence.

use raven_core::pipeline::{PhasePlan, PipelineContext, PipelineOrchestrator, PipelinePlan};
use raven_core::task::discover_tasks;

use crate::context::CliContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &CliContext,
    phase: Option<i64>,
    from_phase: Option<i64>,
    implement_agent: Option<String>,
    review_agents: &[String],
    pr_agent: Option<String>,
    skip_implement: bool,
    skip_review: bool,
    skip_pr: bool,
    interactive: bool,
    base: &str,
    sync_base: bool,
) -> i32 {
    if phase.is_some() && from_phase.is_some() {
        eprintln!("--phase and --from-phase are mutually exclusive");
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
    let phases_config = match ctx.phase_config() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("loading phases: {e}");
            return super::EXIT_ERROR;
        }
    };

    let mut phase_plans: Vec<PhasePlan> = phases_config
        .phases()
        .iter()
        .map(|p| PhasePlan { id: p.id, name: p.name.clone() })
        .collect();
    if let Some(id) = phase {
        phase_plans.retain(|p| p.id == id);
    } else if let Some(from) = from_phase {
        phase_plans.retain(|p| p.id >= from);
    }
    if phase_plans.is_empty() {
        eprintln!("no matching phases to run");
        return super::EXIT_ERROR;
    }

    let registry = ctx.agent_registry();
    let implement_agent_name = implement_agent.unwrap_or_else(|| "claude".to_string());
    let pr_agent_name = pr_agent.clone().unwrap_or_else(|| implement_agent_name.clone());
    let review_agent_names: Vec<String> = if review_agents.is_empty() {
        vec![implement_agent_name.clone()]
    } else {
        review_agents.to_vec()
    };

    let plan = PipelinePlan {
        phases: phase_plans,
        branch_template: ctx.config.resolved.project.branch_template.clone(),
        base_branch: base.to_string(),
        chain_from_previous: !sync_base,
        skip_implement,
        skip_review,
        skip_pr,
        review_agents: review_agent_names.clone(),
        verification_commands: ctx.config.resolved.project.verification_commands.clone(),
        max_fix_cycles: 3,
    };

    let context = PipelineContext {
        tasks,
        state_store,
        phases: phases_config,
        implement_agent: registry.resolve(&implement_agent_name),
        review_agents: review_agent_names.iter().map(|name| registry.resolve(name)).collect(),
        pr_agent: registry.resolve(&pr_agent_name),
        coordinator: ctx.coordinator(),
        git: ctx.git(),
        events: None,
        project_brief: ctx.config.resolved.project.name.clone(),
        review_rules: ctx.config.resolved.review.risk_patterns.join(", "),
        checkpoint_dir: ctx.checkpoint_dir(),
    };

    let orchestrator = PipelineOrchestrator::new(context, plan);

    if ctx.dry_run {
        for line in orchestrator.dry_run() {
            println!("{line}");
        }
        return super::EXIT_OK;
    }

    if interactive {
        eprint!("Run pipeline across the phases above? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush().ok();
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() || !input.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return super::EXIT_CANCELLED;
        }
    }

    ctx.spawn_ctrl_c_handler();

    let run_id = format!("pipeline-{}", uuid::Uuid::new_v4());
    match orchestrator.run(&run_id, ctx.cancel.clone()).await {
        Ok(metadata) => {
            for phase in &metadata.phases {
                println!("phase {} ({}): {:?}", phase.id, phase.name, phase.status);
            }
            let all_done = metadata
                .phases
                .iter()
                .all(|p| matches!(p.status, raven_core::pipeline::PhaseStatus::Completed | raven_core::pipeline::PhaseStatus::Skipped));
            if all_done {
                super::EXIT_OK
            } else {
                super::EXIT_PARTIAL
            }
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
