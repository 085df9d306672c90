//! JSON Extractor: tolerant structured-object recovery from freeform
//! agent output.
//!
//! No direct analog upstream of this — agents there talk rig's
//! typed completion API, not freeform CLI transcripts — so this is
//! built fresh from the spec (§4.10), in the same tolerant-parsing
//! posture applied in [`crate::stream`] and its own
//! `harness` "malformed input is never fatal" rule.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RavenError, RavenResult};

/// Hard input size cap before attempting to parse anything (§4.10.5).
pub const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Strip ANSI escape sequences (`ESC [ ... letter`) and a leading BOM.
fn normalize(input: &str) -> String {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            while let Some(&next) = chars.peek() {
                chars.next();
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// A candidate span of text that looks like a balanced JSON value.
struct Candidate {
    text: String,
    /// Byte offset of the opening brace/bracket in the normalized input,
    /// used to prefer the earliest top-level candidate when sizes tie.
    start: usize,
}

/// Fenced-code-block spans (inclusive byte ranges of the fence markers
/// themselves), so the balance scanner can skip over them.
fn fenced_blocks(input: &str) -> Vec<(usize, usize, String)> {
    let mut blocks = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while let Some(open) = input[i..].find("```") {
        let open_start = i + open;
        let after_fence = open_start + 3;
        // skip a language tag up to the next newline
        let body_start = input[after_fence..]
            .find('\n')
            .map(|nl| after_fence + nl + 1)
            .unwrap_or(after_fence);
        let Some(close_rel) = input[body_start..].find("```") else {
            break;
        };
        let body_end = body_start + close_rel;
        let fence_end = body_end + 3;
        blocks.push((open_start, fence_end, input[body_start..body_end].to_string()));
        i = fence_end.min(bytes.len());
        if i >= bytes.len() {
            break;
        }
    }
    blocks
}

/// Sweep non-fenced regions for balanced `{...}` / `[...]` spans,
/// respecting string literals and escapes.
fn balance_scan(input: &str, skip_ranges: &[(usize, usize)]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (byte_pos, c) = chars[i];
        if skip_ranges.iter().any(|(s, e)| byte_pos >= *s && byte_pos < *e) {
            i += 1;
            continue;
        }
        if c == '{' || c == '[' {
            let open = c;
            let close = if c == '{' { '}' } else { ']' };
            let mut depth = 1i32;
            let mut in_string = false;
            let mut escaped = false;
            let mut j = i + 1;
            let mut end_byte = None;
            while j < chars.len() {
                let (bp, cj) = chars[j];
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if cj == '\\' {
                        escaped = true;
                    } else if cj == '"' {
                        in_string = false;
                    }
                } else if cj == '"' {
                    in_string = true;
                } else if cj == open {
                    depth += 1;
                } else if cj == close {
                    depth -= 1;
                    if depth == 0 {
                        end_byte = Some(bp + cj.len_utf8());
                        break;
                    }
                }
                j += 1;
            }
            if let Some(end) = end_byte {
                candidates.push(Candidate {
                    text: input[byte_pos..end].to_string(),
                    start: byte_pos,
                });
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    candidates
}

/// Recover a `T` from freeform `input`. Tries fenced code blocks first
/// (in order), then balanced-brace scanning of the rest of the text,
/// preferring the outermost (longest) candidate. Returns the number of
/// candidates tried in the error case.
pub fn extract<T: DeserializeOwned>(input: &str) -> RavenResult<T> {
    if input.len() > MAX_INPUT_BYTES {
        return Err(RavenError::ValidationFailed(format!(
            "input exceeds {MAX_INPUT_BYTES} byte cap"
        )));
    }
    let normalized = normalize(input);
    let mut tried = 0usize;

    let fences = fenced_blocks(&normalized);
    for (_, _, body) in &fences {
        tried += 1;
        if let Ok(value) = serde_json::from_str::<T>(body.trim()) {
            return Ok(value);
        }
    }

    let skip_ranges: Vec<(usize, usize)> = fences.iter().map(|(s, e, _)| (*s, *e)).collect();
    let mut candidates = balance_scan(&normalized, &skip_ranges);
    // Prefer the outermost (longest) candidate; break ties by earliest start.
    candidates.sort_by(|a, b| b.text.len().cmp(&a.text.len()).then(a.start.cmp(&b.start)));

    for candidate in &candidates {
        tried += 1;
        if let Ok(value) = serde_json::from_str::<T>(&candidate.text) {
            return Ok(value);
        }
    }

    Err(RavenError::ValidationFailed(format!(
        "no parseable JSON candidate found ({tried} candidates tried)"
    )))
}

/// Like [`extract`] but returns the raw [`Value`] rather than a typed
/// struct — used by callers that validate structure downstream.
pub fn extract_value(input: &str) -> RavenResult<Value> {
    extract::<Value>(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        name: String,
        count: u32,
    }

    #[test]
    fn extracts_from_fenced_block_with_noise_around_it() {
        let input = "Sure, here you go:\n```json\n{\"name\":\"a\",\"count\":3}\n```\nhope that helps!";
        let parsed: Thing = extract(input).unwrap();
        assert_eq!(parsed, Thing { name: "a".into(), count: 3 });
    }

    #[test]
    fn extracts_outermost_balanced_object_without_fences() {
        let input = "result = {\"name\":\"b\",\"count\":7} (trust me)";
        let parsed: Thing = extract(input).unwrap();
        assert_eq!(parsed, Thing { name: "b".into(), count: 7 });
    }

    #[test]
    fn prefers_outermost_over_nested_substring_match() {
        let input = r#"{"outer": true, "name":"c","count":1}"#;
        // Not a `Thing` shape at the top level (has an extra bool field that
        // is ignored by default serde struct parsing), but still parses
        // because serde ignores unknown fields by default.
        let parsed: Thing = extract(input).unwrap();
        assert_eq!(parsed, Thing { name: "c".into(), count: 1 });
    }

    #[test]
    fn no_candidate_parseable_reports_count() {
        let err = extract::<Thing>("no json here at all").unwrap_err();
        assert!(matches!(err, RavenError::ValidationFailed(_)));
    }

    #[test]
    fn strips_ansi_escapes_before_parsing() {
        let input = "\u{1b}[32m{\"name\":\"d\",\"count\":2}\u{1b}[0m";
        let parsed: Thing = extract(input).unwrap();
        assert_eq!(parsed, Thing { name: "d".into(), count: 2 });
    }

    #[test]
    fn respects_braces_inside_string_literals() {
        let input = r#"{"name":"has } inside", "count": 9}"#;
        let parsed: Thing = extract(input).unwrap();
        assert_eq!(parsed, Thing { name: "has } inside".into(), count: 9 });
    }
}
