//! Shared value types for the PRD Decomposition pipeline (§4.8, §3
//! EpicBreakdown/Epic/TaskDef). Temp ids (`E-NNN`, `ENNN-TNN`) are
//! rewritten to global `T-NNN` ids only in the gather stage.

use serde::{Deserialize, Serialize};

/// Stage 1 (shred) output: the PRD's epics, before per-epic task
/// expansion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpicBreakdown {
    pub epics: Vec<Epic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Epic {
    /// Temp id, `E-NNN`.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Other epics' temp ids this epic depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Stage 2 (scatter) per-epic worker output.
#[derive(Debug, Clone, Deserialize)]
pub struct EpicTasks {
    pub epic_id: String,
    pub tasks: Vec<TaskDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskDef {
    /// Temp id, `ENNN-TNN`.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Local refs (`ENNN-TNN`) or cross-epic refs (`E-NNN:label`).
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// A fully resolved, globally-numbered task emitted by the gather stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatheredTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    /// Topological depth of the owning epic, used to auto-generate
    /// `phases.conf` (§4.8 step 7).
    pub depth: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GatherReport {
    pub tasks: Vec<GatheredTask>,
    pub unresolved_refs: Vec<String>,
    pub ambiguous_refs: Vec<String>,
    pub duplicates_merged: usize,
}

/// One epic's outcome from stage 2, including failure — mirrors the
/// review pipeline's "workers always return success locally" posture
/// (§4.8 Stage 2: "a distinguished sentinel 'validation exhausted' is
/// non-fatal").
#[derive(Debug, Clone)]
pub struct ScatterOutcome {
    pub epic_id: String,
    pub tasks: Vec<TaskDef>,
    pub validation_exhausted: bool,
    pub error: Option<String>,
}
