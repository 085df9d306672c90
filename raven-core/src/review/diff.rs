//! Diff stage and split-mode file partitioning (§4.7).

use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::RavenResult;
use crate::git::GitSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: String,
    pub risk: RiskLevel,
}

/// The diff stage's output: filtered, risk-classified changed files plus
/// the unified diff text for each (keyed by path for split-mode lookup).
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    pub files: Vec<ChangedFile>,
    pub unified: String,
}

fn classify_risk(path: &str, risk_patterns: &[Regex]) -> RiskLevel {
    if risk_patterns.iter().any(|re| re.is_match(path)) {
        RiskLevel::High
    } else {
        RiskLevel::Normal
    }
}

/// Run `diff --name-status` + unified diff against `base`, filter by
/// `extensions` regex, and classify risk by `risk_patterns`.
pub async fn collect_diff(
    git: &GitSurface,
    cancel: &CancellationToken,
    base: &str,
    extensions: &Regex,
    risk_patterns: &[Regex],
) -> RavenResult<DiffSet> {
    let entries = git.diff_name_status(cancel, base).await?;
    let unified = git.diff_unified(cancel, base).await?;

    let files = entries
        .into_iter()
        .map(|entry| entry.path().to_string())
        .filter(|path| extensions.is_match(path))
        .map(|path| {
            let risk = classify_risk(&path, risk_patterns);
            ChangedFile { path, risk }
        })
        .collect();

    Ok(DiffSet { files, unified })
}

fn default_risk_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        ["auth", "crypto", "security", "migration"]
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect()
    })
}

/// Compile `[review] extensions`/`risk_patterns` config strings into
/// regexes, falling back to the built-in defaults for risk patterns.
pub fn compile_risk_patterns(patterns: &[String]) -> RavenResult<Vec<Regex>> {
    if patterns.is_empty() {
        return Ok(default_risk_res().clone());
    }
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| crate::error::RavenError::InvalidInput(e.to_string())))
        .collect()
}

/// Round-robin partition `files` across `n` buckets, placing high-risk
/// files first so every worker gets a comparable risk load (§4.7 Split
/// mode).
pub fn split_round_robin(files: &[ChangedFile], n: usize) -> Vec<Vec<ChangedFile>> {
    let n = n.max(1);
    let mut ordered: Vec<&ChangedFile> = files.iter().collect();
    ordered.sort_by(|a, b| b.risk.cmp(&a.risk));

    let mut buckets: Vec<Vec<ChangedFile>> = vec![Vec::new(); n];
    for (i, file) in ordered.into_iter().enumerate() {
        buckets[i % n].push(file.clone());
    }
    buckets
}

/// Extract the unified-diff hunks belonging to `paths` out of a larger
/// unified diff, by scanning for `diff --git` section headers.
pub fn sub_diff(unified: &str, paths: &[String]) -> String {
    let mut out = String::new();
    let mut keep = false;
    for line in unified.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            keep = paths.iter().any(|p| rest.contains(p.as_str()));
        }
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, risk: RiskLevel) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            risk,
        }
    }

    #[test]
    fn split_round_robin_front_loads_high_risk() {
        let files = vec![
            file("a.rs", RiskLevel::Normal),
            file("auth.rs", RiskLevel::High),
            file("b.rs", RiskLevel::Normal),
            file("crypto.rs", RiskLevel::High),
        ];
        let buckets = split_round_robin(&files, 2);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0][0].risk, RiskLevel::High);
        assert_eq!(buckets[1][0].risk, RiskLevel::High);
    }

    #[test]
    fn split_round_robin_handles_n_greater_than_files() {
        let files = vec![file("a.rs", RiskLevel::Normal)];
        let buckets = split_round_robin(&files, 4);
        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets.iter().filter(|b| !b.is_empty()).count(), 1);
    }

    #[test]
    fn classify_risk_matches_configured_pattern() {
        let patterns = compile_risk_patterns(&["auth".to_string()]).unwrap();
        assert_eq!(classify_risk("src/auth/login.rs", &patterns), RiskLevel::High);
        assert_eq!(classify_risk("src/lib.rs", &patterns), RiskLevel::Normal);
    }

    #[test]
    fn sub_diff_extracts_only_matching_sections() {
        let unified = "diff --git a/x.rs b/x.rs\n+hunk x\ndiff --git a/y.rs b/y.rs\n+hunk y\n";
        let out = sub_diff(unified, &["x.rs".to_string()]);
        assert!(out.contains("hunk x"));
        assert!(!out.contains("hunk y"));
    }

    #[test]
    fn default_risk_patterns_cover_security_terms() {
        let patterns = compile_risk_patterns(&[]).unwrap();
        assert_eq!(classify_risk("src/security/acl.rs", &patterns), RiskLevel::High);
    }
}
