//! PR body generator (§4.7 "PR body generator"): an AI-generated summary
//! with heading-level adjustment and a hard size cap. Agent failures are
//! swallowed — the caller always gets a usable body.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, RunOpts};

/// Platform-dependent default cap; GitHub's PR body limit is ~65536
/// bytes and this is treated as the platform default (§4.7).
pub const DEFAULT_BODY_CAP_BYTES: usize = 65 * 1024;

/// Push every markdown heading in `text` down by one level (`#` ->
/// `##`, …) so an agent-generated summary nests under the caller's own
/// top-level heading rather than competing with it.
pub fn demote_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with('#') {
                format!("#{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate `text` to `cap` bytes on a UTF-8 char boundary, appending a
/// truncation marker.
pub fn cap_size(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let marker = "\n\n…(truncated)";
    let budget = cap.saturating_sub(marker.len());
    let mut end = budget.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], marker)
}

fn templated_fallback(branch: &str, files_changed: usize, findings_resolved: usize) -> String {
    format!(
        "## Summary\n\nAutomated changes on `{branch}`.\n\n- Files changed: {files_changed}\n- Review findings resolved: {findings_resolved}\n"
    )
}

/// Generate a PR body by prompting `agent` for a summary of `diff_text`.
/// On any agent error the templated fallback is returned instead — PR
/// creation must never fail because the summary agent did.
pub async fn generate_pr_body(
    agent: &Arc<dyn Agent>,
    cancel: CancellationToken,
    working_dir: &std::path::Path,
    branch: &str,
    diff_text: &str,
    files_changed: usize,
    findings_resolved: usize,
    cap: usize,
) -> String {
    let prompt = format!(
        "Write a concise pull request description (markdown) for this diff on branch `{branch}`. \
         Use a top-level `# Summary` heading followed by a bullet list of the key changes.\n\n{diff_text}"
    );
    let opts = RunOpts::new(working_dir).with_prompt(prompt);

    let body = match agent.run(cancel, opts).await {
        Ok(result) if result.succeeded() && !result.stdout.trim().is_empty() => {
            demote_headings(result.stdout.trim())
        }
        _ => templated_fallback(branch, files_changed, findings_resolved),
    };

    cap_size(&body, cap)
}
