//! Shared value types for the pipeline orchestrator (§4.9): the plan a
//! caller hands in, and the `PipelineMetadata` record persisted inside
//! the run's `WorkflowState.metadata`.

use serde::{Deserialize, Serialize};

/// One phase in a multi-phase pipeline plan.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub id: i64,
    pub name: String,
}

/// Caller-supplied plan for a full pipeline run (§4.9 "Multi-phase
/// execution").
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub phases: Vec<PhasePlan>,
    /// e.g. `"phase/{id}-{slug}"`.
    pub branch_template: String,
    pub base_branch: String,
    /// Each phase branches from the previous phase's branch rather than
    /// `base_branch`, chaining work forward.
    pub chain_from_previous: bool,
    pub skip_implement: bool,
    pub skip_review: bool,
    pub skip_pr: bool,
    pub review_agents: Vec<String>,
    pub verification_commands: Vec<String>,
    pub max_fix_cycles: u32,
}

impl PipelinePlan {
    /// Render `branch_template` for `phase`, lowercasing and
    /// punctuation-stripping the name into a slug (§4.9: "`slug` is a
    /// lowercased, punctuation-stripped phase-name").
    pub fn branch_name(&self, phase: &PhasePlan) -> String {
        let slug = slugify(&phase.name);
        self.branch_template
            .replace("{id}", &phase.id.to_string())
            .replace("{slug}", &slug)
    }
}

pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetadata {
    pub id: i64,
    pub name: String,
    pub status: PhaseStatus,
    pub duration_ns: u64,
    pub branch: String,
    pub pr_url: Option<String>,
}

/// Persisted as a JSON value under the key `"pipeline"` in
/// `WorkflowState.metadata` (§4.9: "Per-phase result captured in the
/// run's `WorkflowState.Metadata`...so the state file stays a single
/// coherent record").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub phases: Vec<PhaseMetadata>,
}

impl PipelineMetadata {
    pub const METADATA_KEY: &'static str = "pipeline";

    pub fn first_incomplete_index(&self) -> usize {
        self.phases
            .iter()
            .position(|p| !matches!(p.status, PhaseStatus::Completed | PhaseStatus::Skipped))
            .unwrap_or(self.phases.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_strips_punctuation_and_lowercases() {
        assert_eq!(slugify("Add Auth & Billing!"), "add-auth-billing");
    }

    #[test]
    fn branch_name_substitutes_id_and_slug() {
        let plan = PipelinePlan {
            phases: vec![],
            branch_template: "phase/{id}-{slug}".to_string(),
            base_branch: "main".to_string(),
            chain_from_previous: false,
            skip_implement: false,
            skip_review: false,
            skip_pr: false,
            review_agents: vec![],
            verification_commands: vec![],
            max_fix_cycles: 3,
        };
        let phase = PhasePlan { id: 2, name: "Core Auth".to_string() };
        assert_eq!(plan.branch_name(&phase), "phase/2-core-auth");
    }

    #[test]
    fn first_incomplete_index_skips_completed_and_skipped() {
        let metadata = PipelineMetadata {
            phases: vec![
                PhaseMetadata { id: 1, name: "a".into(), status: PhaseStatus::Completed, duration_ns: 0, branch: "b1".into(), pr_url: None },
                PhaseMetadata { id: 2, name: "b".into(), status: PhaseStatus::Skipped, duration_ns: 0, branch: "b2".into(), pr_url: None },
                PhaseMetadata { id: 3, name: "c".into(), status: PhaseStatus::Failed, duration_ns: 0, branch: "b3".into(), pr_url: None },
            ],
        };
        assert_eq!(metadata.first_incomplete_index(), 2);
    }
}
