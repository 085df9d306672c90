//! Shared rate-limit message parsing.
//!
//! §4.1: "each adapter defines 2–3 pre-compiled regexes in precedence
//! order". The patterns below cover the phrasing modern coding-CLI
//! providers actually emit; each concrete adapter picks a precedence
//! order appropriate to its own provider's wording, but all funnel
//! through this shared duration grammar rather than re-deriving one.

use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;

use super::RateLimitInfo;

fn short_seconds_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)try again in\s+([\d.]+)\s*s(?:ec(?:ond)?s?)?").unwrap())
}

fn long_unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)try again in\s+(?:(\d+)\s*day[s]?)?\s*(?:(\d+)\s*hour[s]?)?\s*(?:(\d+)\s*min(?:ute)?[s]?)?",
        )
        .unwrap()
    })
}

fn generic_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)rate.?limit(ed)?\s+reached|429|too many requests").unwrap())
}

/// Parse a provider's freeform rate-limit message. Absent duration ⇒
/// zero, which callers treat as "use default backoff" (§4.1).
pub fn parse(output: &str) -> RateLimitInfo {
    if let Some(caps) = short_seconds_re().captures(output) {
        let secs: f64 = caps[1].parse().unwrap_or(0.0);
        return RateLimitInfo {
            is_limited: true,
            reset_after: Duration::from_secs_f64(secs.max(0.0)),
            message: output.trim().to_string(),
        };
    }

    if let Some(caps) = long_unit_re().captures(output) {
        let days: u64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let hours: u64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let mins: u64 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        if days > 0 || hours > 0 || mins > 0 {
            let secs = days * 86_400 + hours * 3_600 + mins * 60;
            return RateLimitInfo {
                is_limited: true,
                reset_after: Duration::from_secs(secs),
                message: output.trim().to_string(),
            };
        }
    }

    if generic_keyword_re().is_match(output) {
        return RateLimitInfo {
            is_limited: true,
            reset_after: Duration::ZERO,
            message: output.trim().to_string(),
        };
    }

    RateLimitInfo::default()
}
