//! Signal detection in agent output (§4.6 step "detect", §3 GLOSSARY
//! "control signal"): a plain-text substring scan for the three control
//! tokens, falling back to a re-scan of decoded `stream-json` assistant
//! text when the plain scan finds nothing — an agent running in
//! `stream-json` mode may emit the token only inside an assistant text
//! block, never as a bare line of stdout.

use crate::stream::StreamDecoder;

pub const TOKEN_PHASE_COMPLETE: &str = "PHASE_COMPLETE";
pub const TOKEN_TASK_BLOCKED: &str = "TASK_BLOCKED";
pub const TOKEN_RAVEN_ERROR: &str = "RAVEN_ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    PhaseComplete,
    TaskBlocked { reason: String },
    RavenError { reason: String },
}

/// Pull the one-line reason following `token` on the same line, if any.
fn reason_after(haystack: &str, token: &str) -> Option<String> {
    let line = haystack.lines().find(|l| l.contains(token))?;
    let after = line.split_once(token)?.1.trim().trim_start_matches(':').trim();
    if after.is_empty() {
        None
    } else {
        Some(after.to_string())
    }
}

/// Scan plain text for the closed set of control tokens, in priority
/// order `PHASE_COMPLETE` > `TASK_BLOCKED` > `RAVEN_ERROR` (§4.6: a
/// response that emits more than one token is resolved by this
/// precedence rather than by position).
fn scan_text(text: &str) -> Option<Signal> {
    if text.contains(TOKEN_PHASE_COMPLETE) {
        return Some(Signal::PhaseComplete);
    }
    if text.contains(TOKEN_TASK_BLOCKED) {
        return Some(Signal::TaskBlocked {
            reason: reason_after(text, TOKEN_TASK_BLOCKED)
                .unwrap_or_else(|| "no reason given".to_string()),
        });
    }
    if text.contains(TOKEN_RAVEN_ERROR) {
        return Some(Signal::RavenError {
            reason: reason_after(text, TOKEN_RAVEN_ERROR)
                .unwrap_or_else(|| "no reason given".to_string()),
        });
    }
    None
}

/// Detect a control signal in combined agent output. Tries a plain-text
/// scan of `stdout`+`stderr` first (covers `text`/`json` output agents);
/// if nothing is found, re-decodes `stdout` as `stream-json` lines and
/// scans assistant text blocks, since a `stream-json` agent's control
/// token is typically embedded in an assistant message rather than
/// printed as a bare stdout line.
pub fn detect_signal(stdout: &str, stderr: &str) -> Option<Signal> {
    let combined = format!("{stdout}\n{stderr}");
    if let Some(signal) = scan_text(&combined) {
        return Some(signal);
    }

    let mut decoder = StreamDecoder::new();
    let mut assistant_text = String::new();
    for line in stdout.lines() {
        if let Some(event) = decoder.feed_line(line) {
            if event.is_text() {
                assistant_text.push_str(&event.text_content());
                assistant_text.push('\n');
            }
        }
    }
    scan_text(&assistant_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_phase_complete_detected() {
        let signal = detect_signal("all done\nPHASE_COMPLETE\n", "");
        assert_eq!(signal, Some(Signal::PhaseComplete));
    }

    #[test]
    fn priority_order_favors_phase_complete_over_task_blocked() {
        let signal = detect_signal("TASK_BLOCKED: missing creds\nPHASE_COMPLETE\n", "");
        assert_eq!(signal, Some(Signal::PhaseComplete));
    }

    #[test]
    fn priority_order_favors_task_blocked_over_raven_error() {
        let signal = detect_signal("RAVEN_ERROR: oops\nTASK_BLOCKED: need input\n", "");
        assert_eq!(
            signal,
            Some(Signal::TaskBlocked {
                reason: "need input".to_string()
            })
        );
    }

    #[test]
    fn task_blocked_reason_extracted_from_same_line() {
        let signal = detect_signal("TASK_BLOCKED: waiting on design review\n", "");
        assert_eq!(
            signal,
            Some(Signal::TaskBlocked {
                reason: "waiting on design review".to_string()
            })
        );
    }

    #[test]
    fn no_signal_returns_none() {
        assert_eq!(detect_signal("just some normal output", ""), None);
    }

    #[test]
    fn falls_back_to_stream_json_assistant_text() {
        let line = r#"{"type":"assistant","content":[{"type":"text","text":"working... PHASE_COMPLETE"}]}"#;
        let signal = detect_signal(line, "");
        assert_eq!(signal, Some(Signal::PhaseComplete));
    }

    #[test]
    fn stderr_is_scanned_too() {
        let signal = detect_signal("", "RAVEN_ERROR: disk full");
        assert_eq!(
            signal,
            Some(Signal::RavenError {
                reason: "disk full".to_string()
            })
        );
    }
}
