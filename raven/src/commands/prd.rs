//! `raven prd` (§6, §4.8): decompose a PRD document into a
//! globally-numbered task tree.

use std::path::{Path, PathBuf};

use raven_core::prd::{PrdPipeline, PrdRequest};

use crate::context::CliContext;

pub async fn run(
    ctx: &CliContext,
    file: &Path,
    agent_name: &str,
    output_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    single_pass: bool,
) -> i32 {
    let prd_text = match std::fs::read_to_string(file) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("reading {}: {e}", file.display());
            return super::EXIT_ERROR;
        }
    };

    let registry = ctx.agent_registry();
    let agent = registry.resolve(agent_name);
    if let Err(e) = agent.check_prerequisites() {
        eprintln!("{e}");
        return super::EXIT_ERROR;
    }

    let run_id = format!("prd-{}", uuid::Uuid::new_v4());
    let mut request = PrdRequest::new(run_id.clone(), prd_text, &ctx.project_root, ctx.tasks_dir());
    if let Some(dir) = output_dir {
        request.work_directory = dir;
    }
    if let Some(n) = concurrency {
        request.scatter_concurrency = n;
    }
    if single_pass {
        request.scatter_concurrency = 1;
    }

    if ctx.dry_run {
        println!(
            "would run prd decomposition: agent={agent_name} concurrency={} work_dir={}",
            request.scatter_concurrency,
            request.work_directory.display()
        );
        return super::EXIT_OK;
    }

    ctx.spawn_ctrl_c_handler();

    let pipeline = PrdPipeline::new(agent, ctx.coordinator());
    match pipeline.run(ctx.cancel.clone(), &request).await {
        Ok(outcome) => {
            println!(
                "decomposed {} epic(s) into {} task(s)",
                outcome.epics.len(),
                outcome.report.tasks.len()
            );
            if !outcome.failed_epics.is_empty() {
                eprintln!("epics that failed to decompose: {}", outcome.failed_epics.join(", "));
                super::EXIT_PARTIAL
            } else {
                super::EXIT_OK
            }
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
