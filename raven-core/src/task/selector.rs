//! Dependency-aware task selector: read-only O(1) spec lookup plus
//! readiness queries against a [`TaskStateStore`] (§4.4).

use std::collections::HashMap;

use serde::Serialize;

use super::{Phase, PhaseConfig, Task, TaskStateStore, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseProgress {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub not_started: usize,
}

pub struct TaskSelector<'a> {
    tasks_by_id: HashMap<&'a str, &'a Task>,
    ordered: Vec<&'a Task>,
    state: &'a TaskStateStore,
    phases: &'a PhaseConfig,
}

impl<'a> TaskSelector<'a> {
    pub fn new(tasks: &'a [Task], state: &'a TaskStateStore, phases: &'a PhaseConfig) -> Self {
        let mut ordered: Vec<&Task> = tasks.iter().collect();
        ordered.sort_by_key(|t| Task::id_number(&t.id).unwrap_or(u32::MAX));
        let tasks_by_id = ordered.iter().map(|t| (t.id.as_str(), *t)).collect();
        Self {
            tasks_by_id,
            ordered,
            state,
            phases,
        }
    }

    pub fn select_by_id(&self, id: &str) -> Option<&'a Task> {
        self.tasks_by_id.get(id).copied()
    }

    fn is_ready(&self, task: &Task) -> bool {
        if self.state.get(&task.id) != TaskStatus::NotStarted {
            return false;
        }
        task.dependencies
            .iter()
            .all(|dep| self.state.get(dep).satisfies_dependency())
    }

    /// First by ID-order `not_started` task in `phase` whose dependencies
    /// are all `completed`. `None` when nothing is actionable.
    pub fn select_next(&self, phase: &Phase) -> Option<&'a Task> {
        self.ordered
            .iter()
            .find(|t| phase.contains_task(&t.id) && self.is_ready(t))
            .copied()
    }

    /// Like [`Self::select_next`] but bounded by an explicit numeric
    /// `T-NNN` range instead of a phase, for single-task / ad-hoc runs.
    pub fn select_next_in_range(&self, start: u32, end: u32) -> Option<&'a Task> {
        self.ordered
            .iter()
            .find(|t| {
                let Some(n) = Task::id_number(&t.id) else {
                    return false;
                };
                n >= start && n <= end && self.is_ready(t)
            })
            .copied()
    }

    pub fn phase_progress(&self, phase: &Phase) -> PhaseProgress {
        let mut progress = PhaseProgress::default();
        for task in self.ordered.iter().filter(|t| phase.contains_task(&t.id)) {
            progress.total += 1;
            match self.state.get(&task.id) {
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Blocked => progress.blocked += 1,
                TaskStatus::Skipped => progress.skipped += 1,
                TaskStatus::NotStarted => progress.not_started += 1,
            }
        }
        progress
    }

    pub fn all_progress(&self) -> HashMap<i64, PhaseProgress> {
        self.phases
            .phases()
            .iter()
            .map(|p| (p.id, self.phase_progress(p)))
            .collect()
    }

    /// Phase-level completion accepts `completed` OR `skipped` (§4.4),
    /// distinct from per-task dependency readiness which requires
    /// `completed` only.
    pub fn is_phase_complete(&self, phase: &Phase) -> bool {
        let tasks: Vec<&&Task> = self
            .ordered
            .iter()
            .filter(|t| phase.contains_task(&t.id))
            .collect();
        if tasks.is_empty() {
            return true;
        }
        tasks
            .iter()
            .all(|t| self.state.get(&t.id).counts_as_phase_done())
    }

    pub fn blocked_tasks(&self) -> Vec<&'a Task> {
        self.ordered
            .iter()
            .filter(|t| self.state.get(&t.id) == TaskStatus::Blocked)
            .copied()
            .collect()
    }

    pub fn completed_task_ids(&self) -> Vec<String> {
        self.ordered
            .iter()
            .filter(|t| self.state.get(&t.id) == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn remaining_task_ids(&self) -> Vec<String> {
        self.ordered
            .iter()
            .filter(|t| self.state.get(&t.id) != TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            spec_text: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn selects_first_ready_task_in_id_order() {
        let dir = tempdir().unwrap();
        let state = TaskStateStore::load(dir.path().join("s.conf")).unwrap();
        let tasks = vec![task("T-002", &[]), task("T-001", &[])];
        let phases = PhaseConfig::parse("1|P|T-001|T-010\n").unwrap();
        let selector = TaskSelector::new(&tasks, &state, &phases);
        let phase = phases.phase_by_id(1).unwrap();
        let next = selector.select_next(phase).unwrap();
        assert_eq!(next.id, "T-001");
    }

    #[test]
    fn respects_dependency_readiness() {
        let dir = tempdir().unwrap();
        let state = TaskStateStore::load(dir.path().join("s.conf")).unwrap();
        let tasks = vec![task("T-001", &[]), task("T-002", &["T-001"])];
        let phases = PhaseConfig::parse("1|P|T-001|T-010\n").unwrap();
        let selector = TaskSelector::new(&tasks, &state, &phases);
        let phase = phases.phase_by_id(1).unwrap();
        assert_eq!(selector.select_next(phase).unwrap().id, "T-001");

        state.update_status("T-001", TaskStatus::Completed).unwrap();
        assert_eq!(selector.select_next(phase).unwrap().id, "T-002");
    }

    #[test]
    fn skipped_dependency_does_not_satisfy_dependents() {
        let dir = tempdir().unwrap();
        let state = TaskStateStore::load(dir.path().join("s.conf")).unwrap();
        let tasks = vec![task("T-001", &[]), task("T-002", &["T-001"])];
        state.update_status("T-001", TaskStatus::Skipped).unwrap();
        let phases = PhaseConfig::parse("1|P|T-001|T-010\n").unwrap();
        let selector = TaskSelector::new(&tasks, &state, &phases);
        let phase = phases.phase_by_id(1).unwrap();
        assert!(selector.select_next(phase).is_none());
    }

    #[test]
    fn empty_phase_select_next_is_none_and_complete_is_true() {
        let dir = tempdir().unwrap();
        let state = TaskStateStore::load(dir.path().join("s.conf")).unwrap();
        let tasks: Vec<Task> = vec![];
        let phases = PhaseConfig::parse("1|P|T-001|T-010\n").unwrap();
        let selector = TaskSelector::new(&tasks, &state, &phases);
        let phase = phases.phase_by_id(1).unwrap();
        assert!(selector.select_next(phase).is_none());
        assert!(selector.is_phase_complete(phase));
    }

    #[test]
    fn phase_complete_accepts_skipped_or_completed() {
        let dir = tempdir().unwrap();
        let state = TaskStateStore::load(dir.path().join("s.conf")).unwrap();
        let tasks = vec![task("T-001", &[]), task("T-002", &[])];
        state.update_status("T-001", TaskStatus::Completed).unwrap();
        state.update_status("T-002", TaskStatus::Skipped).unwrap();
        let phases = PhaseConfig::parse("1|P|T-001|T-010\n").unwrap();
        let selector = TaskSelector::new(&tasks, &state, &phases);
        assert!(selector.is_phase_complete(phases.phase_by_id(1).unwrap()));
    }
}
