//! Stage 1 — Shred: one agent call over the full PRD, extracting an
//! [`EpicBreakdown`] with retry-on-validation-failure (§4.8 Stage 1).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, RunOpts};
use crate::error::{RavenError, RavenResult};
use crate::json_extract;

use super::types::EpicBreakdown;

const SHRED_PROMPT_TEMPLATE: &str = r#"Break the following PRD into epics. Each epic gets a temporary id "E-001", "E-002", etc. (zero-padded to 3 digits), a title, a one-paragraph summary, and a list of other epic ids it depends on (may be empty).

PRD:
{prd}

Respond with a single JSON object: {{"epics": [{{"id": "E-001", "title": string, "summary": string, "dependencies": ["E-002", ...]}}]}}"#;

fn build_prompt(prd: &str, previous_error: Option<&str>) -> String {
    let base = SHRED_PROMPT_TEMPLATE.replace("{prd}", prd);
    match previous_error {
        Some(err) => format!(
            "{base}\n\nYour previous response did not validate: {err}\nRespond again with only the corrected JSON object."
        ),
        None => base,
    }
}

/// Run stage 1, retrying up to `max_retries` times (in addition to the
/// first attempt) with the validation error fed back into the prompt.
pub async fn shred(
    agent: &Arc<dyn Agent>,
    cancel: CancellationToken,
    working_dir: &std::path::Path,
    prd: &str,
    max_retries: u32,
) -> RavenResult<EpicBreakdown> {
    let mut last_error: Option<String> = None;

    for attempt in 0..=max_retries {
        if cancel.is_cancelled() {
            return Err(RavenError::Cancelled);
        }
        let prompt = build_prompt(prd, last_error.as_deref());
        let opts = RunOpts::new(working_dir).with_prompt(prompt);
        let result = agent.run(cancel.clone(), opts).await?;

        match json_extract::extract::<EpicBreakdown>(&result.stdout) {
            Ok(breakdown) if !breakdown.epics.is_empty() => return Ok(breakdown),
            Ok(_) => {
                last_error = Some("epic breakdown contained zero epics".to_string());
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }
        let _ = attempt;
    }

    Err(RavenError::ValidationFailed(format!(
        "shred stage exhausted {} retries: {}",
        max_retries,
        last_error.unwrap_or_default()
    )))
}
