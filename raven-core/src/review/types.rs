//! Shared value types for the Review Pipeline (§4.7, §3 Finding/Verdict).

use serde::{Deserialize, Serialize};

/// Finding severity, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Per-agent/overall disposition, totally ordered for aggregation
/// (`Blocking` dominates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    ChangesNeeded,
    Blocking,
}

/// A single review finding. `file:line:category` is the dedup identity;
/// `line == 0` denotes a file-level finding and is a valid key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: String,
    pub file: String,
    pub line: u32,
    pub description: String,
    pub suggestion: Option<String>,
    /// Not part of an agent's own JSON output (the review prompt never
    /// asks for it) — populated by the pipeline from the reporting
    /// agent's name right after parsing, then grown by [`super::consolidate::consolidate`]
    /// as duplicate reports merge.
    #[serde(default)]
    pub attributed_agents: Vec<String>,
}

impl Finding {
    pub fn dedup_key(&self) -> (String, u32, String) {
        (self.file.clone(), self.line, self.category.clone())
    }
}

/// The raw JSON shape an agent's review output is expected to decode
/// into, before consolidation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReviewOutput {
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// One worker's result. Workers always return `Ok` locally (§4.7,
/// §5 Fan-out bound): a failed agent invocation or unparsable output is
/// captured in `error`, never propagated to the group.
#[derive(Debug, Clone)]
pub struct AgentReviewResult {
    pub agent: String,
    pub raw_output: String,
    pub duration: std::time::Duration,
    pub parsed: Option<RawReviewOutput>,
    pub error: Option<String>,
}

/// Consolidation statistics (§4.7 "Emit `ConsolidationStats`").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub total_input: usize,
    pub unique: usize,
    pub duplicates_removed: usize,
    pub escalations: usize,
    pub overlap_rate: f64,
    pub per_agent_count: std::collections::BTreeMap<String, usize>,
    pub per_severity_count: std::collections::BTreeMap<Severity, usize>,
}

/// A fully consolidated review across all workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedReview {
    pub verdict: Verdict,
    pub findings: Vec<Finding>,
    pub stats: ConsolidationStats,
    pub worker_errors: Vec<(String, String)>,
}
