//! `raven fix` (§6, §4.7): apply fixes for a previously-generated review
//! report.

use std::path::Path;

use raven_core::review::FixEngine;
use raven_core::verify::{VerificationRunner, VerifyConfig};

use super::review::extract_review;
use crate::context::CliContext;

pub async fn run(ctx: &CliContext, agent_name: &str, report_path: &Path, max_cycles: u32) -> i32 {
    let report_text = match std::fs::read_to_string(report_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("reading {}: {e}", report_path.display());
            return super::EXIT_ERROR;
        }
    };
    let review = match extract_review(&report_text) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };

    if review.findings.is_empty() {
        println!("review report has no findings; nothing to fix");
        return super::EXIT_OK;
    }

    let registry = ctx.agent_registry();
    let agent = registry.resolve(agent_name);
    if let Err(e) = agent.check_prerequisites() {
        eprintln!("{e}");
        return super::EXIT_ERROR;
    }

    if ctx.dry_run {
        println!(
            "would run fix: agent={agent_name} findings={} max_cycles={max_cycles}",
            review.findings.len()
        );
        return super::EXIT_OK;
    }

    ctx.spawn_ctrl_c_handler();

    let coordinator = ctx.coordinator();
    let verifier = VerificationRunner::new(&ctx.project_root, VerifyConfig::default());
    let engine = FixEngine::new(agent, coordinator, verifier, max_cycles);

    let outcome = engine
        .run(
            ctx.cancel.clone(),
            &ctx.project_root,
            &review,
            &ctx.config.resolved.project.verification_commands,
        )
        .await;

    match outcome {
        Ok(outcome) => {
            println!(
                "fix {}: {} cycle(s), stopped because {:?}",
                if outcome.verified { "succeeded" } else { "did not verify" },
                outcome.cycles.len(),
                outcome.stopped_reason
            );
            if outcome.verified {
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
