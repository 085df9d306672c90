//! Task state manager: pipe-delimited `task-state.conf`, serialized
//! under a process-local mutex, written atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use super::TaskStatus;
use crate::atomic::write_atomic;
use crate::error::{RavenError, RavenResult};

/// One row of `task-state.conf`: `T-NNN|status|agent|timestamp|note`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub agent: Option<String>,
    pub timestamp: String,
    pub note: Option<String>,
}

pub struct TaskStateStore {
    path: PathBuf,
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskStateStore {
    /// Load `path` if it exists; otherwise start with an empty map
    /// (§3: "a task with no entry is implicitly `not_started`").
    pub fn load(path: impl Into<PathBuf>) -> RavenResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| RavenError::io(&path, e))?;
            parse_state_file(&content)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn load_map(&self) -> HashMap<String, TaskRecord> {
        self.records.lock().expect("task-state mutex poisoned").clone()
    }

    /// `not_started` when there is no entry, per §3.
    pub fn get(&self, task_id: &str) -> TaskStatus {
        self.records
            .lock()
            .expect("task-state mutex poisoned")
            .get(task_id)
            .map(|r| r.status)
            .unwrap_or(TaskStatus::NotStarted)
    }

    pub fn get_record(&self, task_id: &str) -> Option<TaskRecord> {
        self.records
            .lock()
            .expect("task-state mutex poisoned")
            .get(task_id)
            .cloned()
    }

    pub fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        agent: Option<String>,
        note: Option<String>,
    ) -> RavenResult<()> {
        let record = TaskRecord {
            status,
            agent,
            timestamp: Utc::now().to_rfc3339(),
            note,
        };
        let snapshot = {
            let mut map = self.records.lock().expect("task-state mutex poisoned");
            map.insert(task_id.to_string(), record);
            map.clone()
        };
        self.persist(&snapshot)
    }

    pub fn update_status(&self, task_id: &str, status: TaskStatus) -> RavenResult<()> {
        let agent = self.get_record(task_id).and_then(|r| r.agent);
        self.update(task_id, status, agent, None)
    }

    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let map = self.records.lock().expect("task-state mutex poisoned");
        let mut counts = HashMap::new();
        for record in map.values() {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<String> {
        let map = self.records.lock().expect("task-state mutex poisoned");
        let mut ids: Vec<String> = map
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn persist(&self, snapshot: &HashMap<String, TaskRecord>) -> RavenResult<()> {
        let mut ids: Vec<&String> = snapshot.keys().collect();
        ids.sort();
        let mut content = String::new();
        for id in ids {
            let record = &snapshot[id];
            content.push_str(&format!(
                "{}|{}|{}|{}|{}\n",
                id,
                record.status.as_str(),
                record.agent.as_deref().unwrap_or(""),
                record.timestamp,
                record.note.as_deref().unwrap_or(""),
            ));
        }
        write_atomic(&self.path, content.as_bytes())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_state_file(content: &str) -> RavenResult<HashMap<String, TaskRecord>> {
    let mut records = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(5, '|').collect();
        if fields.len() < 4 {
            continue;
        }
        let id = fields[0].to_string();
        let Some(status) = TaskStatus::parse(fields[1]) else {
            continue;
        };
        let agent = if fields[2].is_empty() {
            None
        } else {
            Some(fields[2].to_string())
        };
        let timestamp = fields[3].to_string();
        let note = fields
            .get(4)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        records.insert(
            id,
            TaskRecord {
                status,
                agent,
                timestamp,
                note,
            },
        );
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn update_then_get_returns_the_same_status() {
        let dir = tempdir().unwrap();
        let store = TaskStateStore::load(dir.path().join("task-state.conf")).unwrap();
        store
            .update("T-001", TaskStatus::InProgress, Some("claude".into()), None)
            .unwrap();
        assert_eq!(store.get("T-001"), TaskStatus::InProgress);
    }

    #[test]
    fn missing_task_is_implicitly_not_started() {
        let dir = tempdir().unwrap();
        let store = TaskStateStore::load(dir.path().join("task-state.conf")).unwrap();
        assert_eq!(store.get("T-999"), TaskStatus::NotStarted);
    }

    #[test]
    fn persisted_state_round_trips_through_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task-state.conf");
        {
            let store = TaskStateStore::load(&path).unwrap();
            store
                .update("T-001", TaskStatus::Completed, Some("claude".into()), Some("done".into()))
                .unwrap();
        }
        let reloaded = TaskStateStore::load(&path).unwrap();
        let record = reloaded.get_record("T-001").unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.agent.as_deref(), Some("claude"));
        assert_eq!(record.note.as_deref(), Some("done"));
    }

    #[test]
    fn status_counts_are_accurate() {
        let dir = tempdir().unwrap();
        let store = TaskStateStore::load(dir.path().join("task-state.conf")).unwrap();
        store.update_status("T-001", TaskStatus::Completed).unwrap();
        store.update_status("T-002", TaskStatus::Completed).unwrap();
        store.update_status("T-003", TaskStatus::Blocked).unwrap();
        let counts = store.status_counts();
        assert_eq!(counts.get(&TaskStatus::Completed), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Blocked), Some(&1));
    }

    #[test]
    fn malformed_lines_are_skipped_without_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task-state.conf");
        std::fs::write(&path, "T-001|completed|claude|2024-01-01T00:00:00Z|\nnot a valid line\nT-002|bogus_status|x|y|z\n").unwrap();
        let store = TaskStateStore::load(&path).unwrap();
        assert_eq!(store.get("T-001"), TaskStatus::Completed);
        assert_eq!(store.get("T-002"), TaskStatus::NotStarted);
    }
}
