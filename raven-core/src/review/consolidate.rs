//! Consolidation: merges per-agent findings into one deduplicated,
//! severity-escalated, sorted review (§4.7 Consolidation, §8 invariant 4).

use std::collections::BTreeMap;

use super::types::{AgentReviewResult, ConsolidatedReview, ConsolidationStats, Finding, Verdict};

/// Collect findings from every worker with a parsed result, deduplicate
/// by `file:line:category`, escalate severity to the max across
/// reporters, aggregate the verdict by total order, and sort
/// deterministically.
pub fn consolidate(results: &[AgentReviewResult]) -> ConsolidatedReview {
    let mut total_input = 0usize;
    let mut per_agent_count = BTreeMap::new();
    let mut worker_errors = Vec::new();
    let mut verdict = Verdict::Approved;

    // file:line:category -> merged finding, preserving first-seen order
    // for a stable tie-break before the final sort.
    let mut merged: Vec<Finding> = Vec::new();
    let mut index: std::collections::HashMap<(String, u32, String), usize> =
        std::collections::HashMap::new();

    for result in results {
        if let Some(err) = &result.error {
            worker_errors.push((result.agent.clone(), err.clone()));
            verdict = verdict.max(Verdict::ChangesNeeded);
            continue;
        }
        let Some(parsed) = &result.parsed else {
            continue;
        };
        if let Some(v) = parsed.verdict {
            verdict = verdict.max(v);
        }
        *per_agent_count.entry(result.agent.clone()).or_insert(0) += parsed.findings.len();
        total_input += parsed.findings.len();

        for finding in &parsed.findings {
            let key = finding.dedup_key();
            match index.get(&key) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    if finding.severity > existing.severity {
                        existing.severity = finding.severity;
                    }
                    for agent in &finding.attributed_agents {
                        if !existing.attributed_agents.contains(agent) {
                            existing.attributed_agents.push(agent.clone());
                        }
                    }
                    if finding.description.len() > existing.description.len() {
                        existing.description = finding.description.clone();
                    }
                    if existing.suggestion.is_none() {
                        existing.suggestion = finding.suggestion.clone();
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(finding.clone());
                }
            }
        }
    }

    merged.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });

    let duplicates_removed = total_input.saturating_sub(merged.len());
    let escalations = merged.iter().filter(|f| f.attributed_agents.len() > 1).count();
    let overlap_rate = if total_input == 0 {
        0.0
    } else {
        duplicates_removed as f64 / total_input as f64
    };

    let mut per_severity_count = BTreeMap::new();
    for finding in &merged {
        *per_severity_count.entry(finding.severity).or_insert(0) += 1;
    }

    let stats = ConsolidationStats {
        total_input,
        unique: merged.len(),
        duplicates_removed,
        escalations,
        overlap_rate,
        per_agent_count,
        per_severity_count,
    };

    ConsolidatedReview {
        verdict,
        findings: merged,
        stats,
        worker_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::{RawReviewOutput, Severity};
    use std::time::Duration;

    fn finding(file: &str, line: u32, category: &str, severity: Severity, desc: &str, agent: &str) -> Finding {
        Finding {
            severity,
            category: category.to_string(),
            file: file.to_string(),
            line,
            description: desc.to_string(),
            suggestion: None,
            attributed_agents: vec![agent.to_string()],
        }
    }

    fn worker(agent: &str, verdict: Verdict, findings: Vec<Finding>) -> AgentReviewResult {
        AgentReviewResult {
            agent: agent.to_string(),
            raw_output: String::new(),
            duration: Duration::from_millis(1),
            parsed: Some(RawReviewOutput {
                verdict: Some(verdict),
                findings,
                summary: None,
            }),
            error: None,
        }
    }

    #[test]
    fn two_reviewers_one_dedupe_escalates_severity_and_verdict() {
        let a = worker(
            "A",
            Verdict::ChangesNeeded,
            vec![finding("main.go", 42, "security", Severity::Medium, "missing check", "A")],
        );
        let b = worker(
            "B",
            Verdict::Blocking,
            vec![finding(
                "main.go",
                42,
                "security",
                Severity::High,
                "missing bounds check on user-controlled index",
                "B",
            )],
        );
        let review = consolidate(&[a, b]);

        assert_eq!(review.findings.len(), 1);
        let finding = &review.findings[0];
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.attributed_agents, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(finding.description, "missing bounds check on user-controlled index");
        assert_eq!(review.verdict, Verdict::Blocking);
    }

    #[test]
    fn errored_worker_counts_as_changes_needed_not_approved() {
        let a = worker("A", Verdict::Approved, vec![]);
        let mut b = worker("B", Verdict::Approved, vec![]);
        b.parsed = None;
        b.error = Some("unparsable output".to_string());
        let review = consolidate(&[a, b]);
        assert_eq!(review.verdict, Verdict::ChangesNeeded);
        assert_eq!(review.worker_errors.len(), 1);
    }

    #[test]
    fn sort_is_severity_desc_then_file_then_line() {
        let a = worker(
            "A",
            Verdict::Approved,
            vec![
                finding("b.rs", 1, "style", Severity::Low, "low", "A"),
                finding("a.rs", 5, "bug", Severity::Critical, "crit", "A"),
                finding("a.rs", 1, "bug", Severity::High, "high", "A"),
            ],
        );
        let review = consolidate(&[a]);
        let ordered: Vec<&str> = review.findings.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(review.findings[0].severity, Severity::Critical);
        assert_eq!(ordered, vec!["a.rs", "a.rs", "b.rs"]);
    }

    #[test]
    fn applying_consolidation_twice_is_idempotent() {
        let a = worker(
            "A",
            Verdict::Blocking,
            vec![finding("x.rs", 0, "bug", Severity::High, "d", "A")],
        );
        let once = consolidate(&[a.clone()]);
        let rerun_input = worker("A", once.verdict, once.findings.clone());
        let twice = consolidate(&[rerun_input]);
        assert_eq!(once.findings, twice.findings);
    }

    #[test]
    fn empty_input_yields_zero_counts_no_div_by_zero() {
        let review = consolidate(&[]);
        assert_eq!(review.stats.total_input, 0);
        assert_eq!(review.stats.overlap_rate, 0.0);
        assert_eq!(review.verdict, Verdict::Approved);
    }

    #[test]
    fn single_finding_from_n_agents_attributes_all() {
        let a = worker(
            "A",
            Verdict::Approved,
            vec![finding("f.rs", 3, "bug", Severity::Low, "d1", "A")],
        );
        let b = worker(
            "B",
            Verdict::Approved,
            vec![finding("f.rs", 3, "bug", Severity::Low, "d2", "B")],
        );
        let c = worker(
            "C",
            Verdict::Approved,
            vec![finding("f.rs", 3, "bug", Severity::Low, "d1x", "C")],
        );
        let review = consolidate(&[a, b, c]);
        assert_eq!(review.findings.len(), 1);
        assert_eq!(review.findings[0].attributed_agents.len(), 3);
    }
}
