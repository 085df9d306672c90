//! Task Model: spec parsing, on-disk status tracking, phase config, and
//! dependency-aware selection.
//!
//! Grounded on `harness::feature_registry::FeatureRegistry`
//! (load/save with atomic writes, `is_blocked`/`ready`/`next_incomplete`,
//! cycle-safe dependency walks) but adapted to the spec's on-disk shapes:
//! markdown task files instead of a single `features.json`, a
//! pipe-delimited `task-state.conf` instead of embedding status in the
//! same file as the spec, and an explicit closed `TaskStatus` set (§3).

mod parser;
mod phase;
mod selector;
mod state;

pub use parser::{discover_tasks, parse_task_file, TaskParseOutcome};
pub use phase::{Phase, PhaseConfig};
pub use selector::{PhaseProgress, TaskSelector};
pub use state::{TaskRecord, TaskStateStore};

use serde::{Deserialize, Serialize};

/// Maximum accepted task-spec file size (§3: "size-capped (≥1 MiB per
/// file)" — interpreted as the cap floor; files at or above 1 MiB are
/// rejected rather than silently truncated).
pub const MAX_TASK_FILE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub spec_text: String,
    pub dependencies: Vec<String>,
}

impl Task {
    /// Numeric ordinal of a `T-NNN` id, used for ID-order selection and
    /// phase range checks.
    pub fn id_number(id: &str) -> Option<u32> {
        id.strip_prefix("T-").and_then(|n| n.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "not_started" => Some(TaskStatus::NotStarted),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            "skipped" => Some(TaskStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_some()
    }

    /// Whether this status satisfies a dependent task's readiness check.
    /// §3/§9: `skipped` does NOT satisfy dependents — only `completed`
    /// does.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Whether this status counts toward phase-level completion.
    /// §4.4 `is_phase_complete`: "all tasks `completed` or `skipped`".
    pub fn counts_as_phase_done(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
