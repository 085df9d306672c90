//! Persisted workflow run state (§3 WorkflowState). One JSON record per
//! run, written atomically after every transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atomic::write_atomic;
use crate::error::{RavenError, RavenResult};

use super::definition::TransitionEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub event: TransitionEvent,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub workflow_name: String,
    pub current_step: String,
    pub step_history: Vec<StepRecord>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(id: impl Into<String>, workflow_name: impl Into<String>, initial_step: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workflow_name: workflow_name.into(),
            current_step: initial_step.into(),
            step_history: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_transition(
        &mut self,
        previous_step: String,
        event: TransitionEvent,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: Option<String>,
        next_step: String,
    ) {
        self.step_history.push(StepRecord {
            step: previous_step,
            event,
            started_at,
            duration_ms: duration.as_millis() as u64,
            error,
        });
        self.current_step = next_step;
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        super::definition::is_terminal_step(&self.current_step)
    }

    pub fn succeeded(&self) -> bool {
        self.current_step == super::definition::DONE_STEP
    }

    fn path_for(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// Atomic write: `<id>.json.tmp` → fsync → rename over `<id>.json`.
    pub fn save(&self, dir: &Path) -> RavenResult<()> {
        let path = Self::path_for(dir, &self.id);
        let content = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &content)
    }

    pub fn load(dir: &Path, id: &str) -> RavenResult<Self> {
        let path = Self::path_for(dir, id);
        let content = std::fs::read_to_string(&path).map_err(|e| RavenError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn list_run_ids(dir: &Path) -> RavenResult<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| RavenError::io(dir, e))? {
            let entry = entry.map_err(|e| RavenError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut state = WorkflowState::new("run-1", "implementation", "select");
        state.record_transition(
            "select".into(),
            TransitionEvent::Success,
            Utc::now(),
            Duration::from_millis(10),
            None,
            "invoke".into(),
        );
        state.save(dir.path()).unwrap();
        let loaded = WorkflowState::load(dir.path(), "run-1").unwrap();
        assert_eq!(loaded.current_step, "invoke");
        assert_eq!(loaded.step_history.len(), 1);
        assert_eq!(loaded.id, state.id);
    }

    #[test]
    fn list_run_ids_sorted() {
        let dir = tempdir().unwrap();
        WorkflowState::new("run-b", "x", "a").save(dir.path()).unwrap();
        WorkflowState::new("run-a", "x", "a").save(dir.path()).unwrap();
        let ids = WorkflowState::list_run_ids(dir.path()).unwrap();
        assert_eq!(ids, vec!["run-a", "run-b"]);
    }
}
