//! `raven review` (§6, §4.7): multi-agent review of a git diff.

use std::path::{Path, PathBuf};

use raven_core::review::{
    compile_risk_patterns, ConsolidatedReview, ReviewMode, ReviewPipeline, ReviewRequest, Severity,
    DEFAULT_DIFF_CEILING_BYTES,
};

use crate::cli::ReviewModeArg;
use crate::context::CliContext;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &CliContext,
    agent_names: &[String],
    concurrency: Option<usize>,
    mode: ReviewModeArg,
    base: &str,
    output: Option<PathBuf>,
) -> i32 {
    if agent_names.is_empty() {
        eprintln!("--agents requires at least one agent name");
        return super::EXIT_ERROR;
    }

    let registry = ctx.agent_registry();
    let agents: Vec<_> = agent_names.iter().map(|name| registry.resolve(name)).collect();

    let extensions = match regex::Regex::new(&ctx.config.resolved.review.extensions) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("review.extensions is not a valid regex: {e}");
            return super::EXIT_ERROR;
        }
    };
    let risk_patterns = match compile_risk_patterns(&ctx.config.resolved.review.risk_patterns) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("review.risk_patterns is invalid: {e}");
            return super::EXIT_ERROR;
        }
    };

    let request = ReviewRequest {
        base_ref: base.to_string(),
        agents: agent_names.to_vec(),
        concurrency: concurrency.unwrap_or(agent_names.len().max(1)),
        mode: match mode {
            ReviewModeArg::All => ReviewMode::All,
            ReviewModeArg::Split => ReviewMode::Split,
        },
        project_brief: project_brief(&ctx.project_root),
        rules: ctx.config.resolved.review.risk_patterns.join(", "),
        extensions,
        risk_patterns,
        diff_ceiling_bytes: DEFAULT_DIFF_CEILING_BYTES,
    };

    if ctx.dry_run {
        println!(
            "would run review: agents={agent_names:?} mode={mode:?} base={base} concurrency={}",
            request.concurrency
        );
        return super::EXIT_OK;
    }

    ctx.spawn_ctrl_c_handler();

    let pipeline = ReviewPipeline::new(ctx.git(), agents, None);
    let run_id = format!("review-{}", uuid::Uuid::new_v4());
    let review = match pipeline.run(&run_id, ctx.cancel.clone(), &request).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        }
    };

    let report = render_report(&review, base);
    match &output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &report) {
                eprintln!("writing {}: {e}", path.display());
                return super::EXIT_ERROR;
            }
            println!("review report written to {}", path.display());
        }
        None => println!("{report}"),
    }

    if !review.worker_errors.is_empty() {
        super::EXIT_PARTIAL
    } else {
        super::EXIT_OK
    }
}

fn project_brief(project_root: &Path) -> String {
    for name in ["README.md", "CLAUDE.md"] {
        if let Ok(text) = std::fs::read_to_string(project_root.join(name)) {
            return text.chars().take(4096).collect();
        }
    }
    String::new()
}

fn render_report(review: &ConsolidatedReview, base: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Review report (base: `{base}`)\n\n"));
    out.push_str(&format!("Verdict: **{:?}**\n\n", review.verdict));
    out.push_str(&format!(
        "Findings: {} unique ({} duplicates removed, {} escalated, overlap rate {:.0}%)\n\n",
        review.stats.unique,
        review.stats.duplicates_removed,
        review.stats.escalations,
        review.stats.overlap_rate * 100.0
    ));

    out.push_str("## Findings\n\n");
    if review.findings.is_empty() {
        out.push_str("No findings.\n\n");
    } else {
        out.push_str("| severity | file | line | category | description |\n");
        out.push_str("|---|---|---|---|---|\n");
        let mut sorted = review.findings.clone();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        for finding in &sorted {
            out.push_str(&format!(
                "| {:?} | {} | {} | {} | {} |\n",
                finding.severity, finding.file, finding.line, finding.category, finding.description
            ));
        }
        out.push('\n');
    }

    out.push_str("## By severity\n\n");
    for sev in [Severity::Critical, Severity::High, Severity::Medium, Severity::Low, Severity::Info] {
        let count = review.stats.per_severity_count.get(&sev).copied().unwrap_or(0);
        if count > 0 {
            out.push_str(&format!("- {sev:?}: {count}\n"));
        }
    }
    out.push('\n');

    out.push_str("## By agent\n\n");
    for (agent, count) in &review.stats.per_agent_count {
        out.push_str(&format!("- {agent}: {count} finding(s)\n"));
    }

    if !review.worker_errors.is_empty() {
        out.push_str("\n## Worker errors\n\n");
        for (agent, err) in &review.worker_errors {
            out.push_str(&format!("- {agent}: {err}\n"));
        }
    }

    out.push_str(&format!(
        "\n{JSON_MARKER_START}\n{}\n{JSON_MARKER_END}\n",
        serde_json::to_string(review).unwrap_or_default()
    ));

    out
}

/// Hidden HTML-comment markers bracketing a JSON dump of the
/// [`ConsolidatedReview`] inside an otherwise human-readable report, so
/// `raven fix --report` can reconstruct the findings without re-parsing
/// the rendered markdown.
pub const JSON_MARKER_START: &str = "<!-- raven:review-json";
pub const JSON_MARKER_END: &str = "-->";

pub fn extract_review(report_text: &str) -> anyhow::Result<ConsolidatedReview> {
    let start = report_text
        .find(JSON_MARKER_START)
        .ok_or_else(|| anyhow::anyhow!("report has no embedded review data (not produced by `raven review`?)"))?;
    let after_marker = &report_text[start + JSON_MARKER_START.len()..];
    let end = after_marker
        .find(JSON_MARKER_END)
        .ok_or_else(|| anyhow::anyhow!("report's embedded review data is truncated"))?;
    let json = after_marker[..end].trim();
    Ok(serde_json::from_str(json)?)
}
