//! `raven pr` (§6, §4.7): open a pull request from the current branch.
//!
//! Invoking the platform CLI ("gh pr create") is part of this binary
//! crate's job, not `raven-core`'s (§1 Out-of-scope names only the body
//! *generator*) — `raven-core` hands back a body string and this
//! handler shells out to create the PR with it.

use std::io::Write;

use raven_core::review::{generate_pr_body, DEFAULT_BODY_CAP_BYTES};

use crate::context::CliContext;

pub async fn run(ctx: &CliContext, base: &str, agent_name: Option<&str>) -> i32 {
    let cancel = ctx.cancel.clone();
    let git = ctx.git();

    let branch = match git.current_branch(&cancel).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    if branch == base {
        eprintln!("current branch '{branch}' is the same as --base '{base}'; nothing to open a PR for");
        return super::EXIT_ERROR;
    }

    let diff = match git.diff_unified(&cancel, base).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };
    let files_changed = match git.diff_name_status(&cancel, base).await {
        Ok(entries) => entries.len(),
        Err(e) => {
            eprintln!("{e}");
            return super::EXIT_ERROR;
        }
    };

    let registry = ctx.agent_registry();
    let body = if let Some(name) = agent_name {
        let agent = registry.resolve(name);
        generate_pr_body(
            &agent,
            cancel.clone(),
            &ctx.project_root,
            &branch,
            &diff,
            files_changed,
            0,
            DEFAULT_BODY_CAP_BYTES,
        )
        .await
    } else {
        format!("## Summary\n\nAutomated changes on `{branch}`.\n\n- Files changed: {files_changed}\n")
    };

    if ctx.dry_run {
        println!("would open PR: base={base} head={branch}\n---\n{body}");
        return super::EXIT_OK;
    }

    if let Err(e) = git.push(&cancel, "origin", &branch).await {
        eprintln!("pushing branch: {e}");
        return super::EXIT_ERROR;
    }

    let mut body_file = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("creating PR body file: {e}");
            return super::EXIT_ERROR;
        }
    };
    if let Err(e) = body_file.write_all(body.as_bytes()) {
        eprintln!("writing PR body file: {e}");
        return super::EXIT_ERROR;
    }

    let output = tokio::process::Command::new("gh")
        .args(["pr", "create", "--base", base, "--head", &branch, "--body-file"])
        .arg(body_file.path())
        .args(["--title", branch.as_str()])
        .current_dir(&ctx.project_root)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            print!("{}", String::from_utf8_lossy(&out.stdout));
            super::EXIT_OK
        }
        Ok(out) => {
            eprintln!("{}", String::from_utf8_lossy(&out.stderr));
            super::EXIT_ERROR
        }
        Err(e) => {
            eprintln!("failed to invoke the platform CLI ('gh'): {e}");
            super::EXIT_ERROR
        }
    }
}
