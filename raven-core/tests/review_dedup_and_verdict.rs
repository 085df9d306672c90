//! End-to-end: two reviewers report the same finding at different
//! severities, one at a lower verdict (spec §8 scenario 3 — "Two
//! reviewers, one dedupe").
//!
//! Reviewer A reports {main.go:42, security, medium, "X"}, verdict
//! CHANGES_NEEDED. Reviewer B reports the same file:line:category at
//! severity high with description "Y and then some more detail",
//! verdict BLOCKING. Consolidation must produce one finding at the
//! higher severity, attributed to both agents, keeping the longer
//! description, with the aggregated verdict at BLOCKING (the total
//! order's maximum).

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use raven_core::agent::{Agent, DryRunCommand, RateLimitInfo, RunOpts, RunResult};
use raven_core::error::RavenResult;
use raven_core::git::GitSurface;
use raven_core::review::{ReviewMode, ReviewPipeline, ReviewRequest, Severity, Verdict};

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git invocation failed");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo_with_a_diff(dir: &std::path::Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "base"]);
    std::fs::write(
        dir.join("main.go"),
        "package main\n\nfunc main() {\n\tquery(userInput)\n}\n",
    )
    .unwrap();
    git(dir, &["commit", "-q", "-am", "add query call"]);
}

struct ScriptedReviewer {
    name: &'static str,
    response: &'static str,
}

#[async_trait]
impl Agent for ScriptedReviewer {
    fn name(&self) -> &str {
        self.name
    }
    fn provider(&self) -> &str {
        "anthropic"
    }
    fn check_prerequisites(&self) -> RavenResult<()> {
        Ok(())
    }
    fn dry_run_command(&self, _opts: &RunOpts) -> DryRunCommand {
        DryRunCommand {
            command_line: self.name.to_string(),
        }
    }
    async fn run(&self, _cancel: CancellationToken, _opts: RunOpts) -> RavenResult<RunResult> {
        Ok(RunResult {
            stdout: self.response.to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(1),
            rate_limit: None,
        })
    }
    fn parse_rate_limit(&self, _output: &str) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}

const REVIEWER_A: &str = r#"{"verdict": "CHANGES_NEEDED", "findings": [{"severity": "medium", "category": "security", "file": "main.go", "line": 42, "description": "X", "suggestion": null}], "summary": "looks mostly fine"}"#;
const REVIEWER_B: &str = r#"{"verdict": "BLOCKING", "findings": [{"severity": "high", "category": "security", "file": "main.go", "line": 42, "description": "Y and then some more detail", "suggestion": null}], "summary": "unsanitized input reaches query()"}"#;

#[tokio::test]
async fn two_reviewers_one_dedupe_escalates_and_aggregates() {
    let dir = tempdir().unwrap();
    init_repo_with_a_diff(dir.path());
    git(dir.path(), &["branch", "base-ref", "HEAD~1"]);

    let git_surface = GitSurface::new(dir.path());
    let agents: Vec<Arc<dyn Agent>> = vec![
        Arc::new(ScriptedReviewer {
            name: "A",
            response: REVIEWER_A,
        }),
        Arc::new(ScriptedReviewer {
            name: "B",
            response: REVIEWER_B,
        }),
    ];
    let pipeline = ReviewPipeline::new(git_surface, agents, None);

    let request = ReviewRequest {
        base_ref: "base-ref".to_string(),
        agents: vec!["A".to_string(), "B".to_string()],
        concurrency: 2,
        mode: ReviewMode::All,
        project_brief: "a test project".to_string(),
        rules: "no unsanitized queries".to_string(),
        extensions: regex::Regex::new(r"\.go$").unwrap(),
        risk_patterns: vec![regex::Regex::new("security").unwrap()],
        diff_ceiling_bytes: 48 * 1024,
    };

    let review = pipeline
        .run("review-1", CancellationToken::new(), &request)
        .await
        .unwrap();

    assert_eq!(review.findings.len(), 1);
    let finding = &review.findings[0];
    assert_eq!(finding.file, "main.go");
    assert_eq!(finding.line, 42);
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.description, "Y and then some more detail");
    let mut agents_seen = finding.attributed_agents.clone();
    agents_seen.sort();
    assert_eq!(agents_seen, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(review.verdict, Verdict::Blocking);
    assert_eq!(review.stats.duplicates_removed, 1);
}
