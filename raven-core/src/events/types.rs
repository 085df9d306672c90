//! Observability event vocabulary.
//!
//! These are lifecycle notifications, not workflow transition events
//! (see [`crate::workflow::TransitionEvent`] for the closed set that drives
//! step resolution). Observability events are best-effort: the bus drops
//! them under backpressure rather than block a producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observability event, tagged with the run it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(run_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    LoopStarted,
    WorkflowStarted { workflow_name: String },
    StepStarted { step: String },
    StepCompleted { step: String, event: String },
    StepFailed { step: String, error: String },
    StepSkipped { step: String },
    Checkpoint { step: String },
    WorkflowCompleted,
    WorkflowFailed { reason: String },
    WorkflowResumed { step: String },

    TaskSelected { task_id: String },
    PhaseComplete { phase: i64 },
    TaskCompleted { task_id: String },
    TaskBlocked { task_id: String, reason: String },
    StaleSelection { task_id: String, repeats: u32 },

    AgentStarted { agent: String, task_id: Option<String> },
    AgentCompleted { agent: String, duration_ms: u64 },
    AgentThinking { agent: String, preview: String },
    ToolStarted { agent: String, tool: String },
    ToolCompleted { agent: String, tool: String },
    SessionStats { agent: String, cost_usd: Option<f64>, turns: Option<u32> },

    RateLimitRecorded { provider: String, wait_secs: f64 },
    RateLimitWait { provider: String, remaining_secs: u64 },
    RateLimitCleared { provider: String },

    StashCreated { task_id: String, message: String },
    StashRestored { task_id: String },

    ReviewWorkerStarted { agent: String },
    ReviewWorkerCompleted { agent: String, finding_count: usize },
    FixCycleStarted { cycle: u32 },
    FixCycleCompleted { cycle: u32, verified: bool },

    PrdShredStarted,
    PrdShredCompleted { epic_count: usize },
    PrdScatterWorkerCompleted { epic_id: String, task_count: usize },
    PrdGatherCompleted { task_count: usize },

    PipelinePhaseStarted { phase_id: i64, branch: String },
    PipelinePhaseCompleted { phase_id: i64, status: String },
}
