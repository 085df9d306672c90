//! Stage 3 — Gather: a pure, agent-free merge of every epic's tasks
//! into one globally-ordered, globally-numbered task set, followed by
//! file emission (§4.8 Stage 3).
//!
//! No agent calls here — everything is deterministic data
//! transformation, grounded on [`crate::task::phase::PhaseConfig`] and
//! [`crate::task::state::TaskStateStore`] for the on-disk shapes this
//! stage must produce.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::atomic::write_atomic;
use crate::error::{RavenError, RavenResult};

use super::types::{Epic, GatherReport, GatheredTask, ScatterOutcome, TaskDef};

/// Normalize a title for dedup comparison: lowercase, collapse
/// whitespace, strip punctuation noise.
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Topologically sort epics by their declared dependencies using Kahn's
/// algorithm, breaking ties lexicographically by epic id for
/// determinism (§4.8 step 3: "global numbering walks epics in
/// topological order, lexicographic tiebreak").
fn topo_sort_epics(epics: &[Epic]) -> RavenResult<Vec<String>> {
    let ids: HashSet<&str> = epics.iter().map(|e| e.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = epics.iter().map(|e| (e.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for epic in epics {
        for dep in &epic.dependencies {
            if !ids.contains(dep.as_str()) {
                continue;
            }
            *in_degree.get_mut(epic.id.as_str()).unwrap() += 1;
            dependents.entry(dep.as_str()).or_default().push(&epic.id);
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    ready.sort();
    let mut queue: VecDeque<&str> = ready.into_iter().collect();

    let mut order = Vec::with_capacity(epics.len());
    let mut in_degree = in_degree;
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            let mut unlocked = Vec::new();
            for &child in children {
                let entry = in_degree.get_mut(child).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    unlocked.push(child);
                }
            }
            unlocked.sort();
            // Re-sort the queue after inserting to keep determinism
            // when several children unlock at once.
            let mut merged: Vec<&str> = queue.into_iter().chain(unlocked).collect();
            merged.sort();
            queue = merged.into_iter().collect();
        }
    }

    if order.len() != epics.len() {
        let missing: Vec<&str> = epics
            .iter()
            .map(|e| e.id.as_str())
            .filter(|id| !order.contains(&id.to_string()))
            .collect();
        return Err(RavenError::ValidationFailed(format!(
            "epic dependency graph has a cycle involving: {}",
            missing.join(", ")
        )));
    }
    Ok(order)
}

fn epic_depth(epics: &[Epic], order: &[String]) -> HashMap<String, u32> {
    let by_id: HashMap<&str, &Epic> = epics.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut depth: HashMap<String, u32> = HashMap::new();
    for id in order {
        let epic = by_id[id.as_str()];
        let d = epic
            .dependencies
            .iter()
            .filter_map(|dep| depth.get(dep))
            .max()
            .copied()
            .map(|m| m + 1)
            .unwrap_or(0);
        depth.insert(id.clone(), d);
    }
    depth
}

/// Width of the zero-padded global id, growing past 3 digits only when
/// the task count demands it (§4.8 step 4: "global `T-NNN` ID
/// assignment with growing zero-pad width >= 3 digits").
fn id_width(count: usize) -> usize {
    let digits = count.to_string().len();
    digits.max(3)
}

/// Merge every epic's scattered tasks into one globally-numbered,
/// dependency-resolved set.
///
/// Steps (§4.8 Stage 3): walk epics in topological order; within an
/// epic, tasks keep their scatter-stage relative order; assign global
/// `T-NNN` ids as they're visited; remap each task's local
/// (`ENNN-TNN`) and cross-epic (`E-NNN:title-slug`) dependency refs to
/// the corresponding global id; merge duplicate tasks (same normalized
/// title) by unioning their acceptance criteria and dependencies;
/// validate the resulting DAG is acyclic.
pub fn gather(epics: &[Epic], outcomes: &[ScatterOutcome]) -> RavenResult<GatherReport> {
    let epic_order = topo_sort_epics(epics)?;
    let depths = epic_depth(epics, &epic_order);

    let outcomes_by_epic: HashMap<&str, &ScatterOutcome> =
        outcomes.iter().map(|o| (o.epic_id.as_str(), o)).collect();

    // local temp id (ENNN-TNN) -> (epic_id, task index within that epic's list)
    let mut local_id_to_epic: HashMap<String, String> = HashMap::new();
    // ordered list of (epic_id, TaskDef) in global emission order, pre-dedup
    let mut ordered: Vec<(String, TaskDef)> = Vec::new();

    for epic_id in &epic_order {
        let Some(outcome) = outcomes_by_epic.get(epic_id.as_str()) else {
            continue;
        };
        for task in &outcome.tasks {
            local_id_to_epic.insert(task.id.clone(), epic_id.clone());
            ordered.push((epic_id.clone(), task.clone()));
        }
    }

    // Cross-epic label lookup: "E-NNN:normalized-title" -> local task id.
    let mut cross_epic_label: HashMap<String, String> = HashMap::new();
    for (epic_id, task) in &ordered {
        let slug = normalize_title(&task.title).replace(' ', "-");
        cross_epic_label.insert(format!("{epic_id}:{slug}"), task.id.clone());
    }

    // Dedup by normalized title, first occurrence wins, later ones merge in.
    let mut canonical_index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<(String, TaskDef, u32)> = Vec::new(); // (epic_id, task, depth)
    let mut local_id_redirect: HashMap<String, String> = HashMap::new(); // duplicate local id -> canonical local id
    let mut duplicates_merged = 0usize;

    for (epic_id, task) in ordered {
        let key = normalize_title(&task.title);
        let depth = depths.get(&epic_id).copied().unwrap_or(0);
        match canonical_index.get(&key) {
            Some(&idx) => {
                duplicates_merged += 1;
                local_id_redirect.insert(task.id.clone(), merged[idx].1.id.clone());
                let (_, existing, _) = &mut merged[idx];
                for ac in task.acceptance_criteria {
                    if !existing.acceptance_criteria.contains(&ac) {
                        existing.acceptance_criteria.push(ac);
                    }
                }
                for dep in task.dependencies {
                    if !existing.dependencies.contains(&dep) {
                        existing.dependencies.push(dep);
                    }
                }
            }
            None => {
                canonical_index.insert(key, merged.len());
                merged.push((epic_id, task, depth));
            }
        }
    }

    // Assign global ids in final (post-dedup, still topo-then-scatter) order.
    let width = id_width(merged.len());
    let mut local_to_global: HashMap<String, String> = HashMap::new();
    for (i, (_, task, _)) in merged.iter().enumerate() {
        local_to_global.insert(task.id.clone(), format!("T-{:0width$}", i + 1, width = width));
    }

    let mut unresolved_refs = Vec::new();
    let mut ambiguous_refs = Vec::new();
    let mut tasks = Vec::new();

    for (_, task, depth) in &merged {
        let mut resolved_deps = Vec::new();
        for dep in &task.dependencies {
            let canonical_local = local_id_redirect.get(dep).cloned().unwrap_or_else(|| dep.clone());
            if let Some(global) = local_to_global.get(&canonical_local) {
                if !resolved_deps.contains(global) {
                    resolved_deps.push(global.clone());
                }
                continue;
            }
            if let Some(local) = cross_epic_label.get(dep) {
                let canonical_local = local_id_redirect.get(local).cloned().unwrap_or_else(|| local.clone());
                if let Some(global) = local_to_global.get(&canonical_local) {
                    if !resolved_deps.contains(global) {
                        resolved_deps.push(global.clone());
                    }
                    continue;
                }
            }
            let matches: Vec<&String> = cross_epic_label
                .keys()
                .filter(|k| k.ends_with(&format!(":{}", dep.to_lowercase().replace(' ', "-"))))
                .collect();
            if matches.len() > 1 {
                ambiguous_refs.push(dep.clone());
            } else {
                unresolved_refs.push(dep.clone());
            }
        }
        let global_id = local_to_global[&task.id];
        tasks.push(GatheredTask {
            id: global_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            dependencies: resolved_deps,
            acceptance_criteria: task.acceptance_criteria.clone(),
            depth: *depth,
        });
    }

    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    validate_acyclic(&tasks)?;

    Ok(GatherReport {
        tasks,
        unresolved_refs,
        ambiguous_refs,
        duplicates_merged,
    })
}

/// Confirm no global task depends (transitively) on itself, tracing the
/// cycle into the error when one exists (§4.8 step 6: "DAG validation
/// with cycle tracing").
fn validate_acyclic(tasks: &[GatheredTask]) -> RavenResult<()> {
    let by_id: HashMap<&str, &GatheredTask> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a GatheredTask>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> RavenResult<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let mut cycle = path.clone();
                cycle.push(id);
                return Err(RavenError::ValidationFailed(format!(
                    "dependency cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            None => {}
        }
        let Some(task) = by_id.get(id) else {
            return Ok(());
        };
        marks.insert(id, Mark::Visiting);
        path.push(id);
        for dep in &task.dependencies {
            visit(dep, by_id, marks, path)?;
        }
        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for task in tasks {
        let mut path = Vec::new();
        visit(&task.id, &by_id, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Emit per-task markdown files, `task-state.conf`, `phases.conf`,
/// `PROGRESS.md`, and `INDEX.md` (with a Mermaid dependency graph) into
/// `tasks_dir` (§4.8 step 7).
pub fn emit(tasks_dir: &Path, report: &GatherReport) -> RavenResult<()> {
    std::fs::create_dir_all(tasks_dir).map_err(|e| RavenError::io(tasks_dir, e))?;

    for task in &report.tasks {
        let mut body = format!("# {}: {}\n\n", task.id, task.title);
        if !task.description.is_empty() {
            body.push_str(&task.description);
            body.push_str("\n\n");
        }
        if !task.dependencies.is_empty() {
            body.push_str("## Dependencies\n\n");
            for dep in &task.dependencies {
                body.push_str(&format!("- {dep}\n"));
            }
            body.push('\n');
        }
        if !task.acceptance_criteria.is_empty() {
            body.push_str("## Acceptance Criteria\n\n");
            for ac in &task.acceptance_criteria {
                body.push_str(&format!("- [ ] {ac}\n"));
            }
        }
        let path = tasks_dir.join(format!("{}.md", task.id));
        write_atomic(&path, body.as_bytes())?;
    }

    let mut state_content = String::new();
    for task in &report.tasks {
        state_content.push_str(&format!("{}|not_started|||\n", task.id));
    }
    write_atomic(&tasks_dir.join("task-state.conf"), state_content.as_bytes())?;

    write_atomic(&tasks_dir.join("phases.conf"), phases_conf(report).as_bytes())?;
    write_atomic(&tasks_dir.join("PROGRESS.md"), progress_md(report).as_bytes())?;
    write_atomic(&tasks_dir.join("INDEX.md"), index_md(report).as_bytes())?;
    Ok(())
}

fn phases_conf(report: &GatherReport) -> String {
    let mut by_depth: BTreeMap<u32, Vec<&GatheredTask>> = BTreeMap::new();
    for task in &report.tasks {
        by_depth.entry(task.depth).or_default().push(task);
    }
    let mut out = String::new();
    for (depth, tasks) in &by_depth {
        let Some(first) = tasks.first() else { continue };
        let Some(last) = tasks.last() else { continue };
        out.push_str(&format!(
            "{}|Phase {}|{}|{}\n",
            depth + 1,
            depth + 1,
            first.id,
            last.id,
        ));
    }
    out
}

fn progress_md(report: &GatherReport) -> String {
    format!(
        "# Progress\n\n{} tasks, 0 completed, {} duplicates merged during decomposition.\n",
        report.tasks.len(),
        report.duplicates_merged,
    )
}

fn index_md(report: &GatherReport) -> String {
    let mut out = String::from("# Task Index\n\n```mermaid\ngraph TD\n");
    for task in &report.tasks {
        out.push_str(&format!("    {}[\"{}: {}\"]\n", task.id, task.id, task.title));
        for dep in &task.dependencies {
            out.push_str(&format!("    {dep} --> {}\n", task.id));
        }
    }
    out.push_str("```\n\n");
    for task in &report.tasks {
        out.push_str(&format!("- [{}]({}.md): {}\n", task.id, task.id, task.title));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epic(id: &str, deps: &[&str]) -> Epic {
        Epic {
            id: id.to_string(),
            title: id.to_string(),
            summary: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn task(id: &str, title: &str, deps: &[&str]) -> TaskDef {
        TaskDef {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            acceptance_criteria: vec!["works".to_string()],
        }
    }

    fn outcome(epic_id: &str, tasks: Vec<TaskDef>) -> ScatterOutcome {
        ScatterOutcome {
            epic_id: epic_id.to_string(),
            tasks,
            validation_exhausted: false,
            error: None,
        }
    }

    #[test]
    fn assigns_global_ids_in_topological_epic_order() {
        let epics = vec![epic("E-002", &["E-001"]), epic("E-001", &[])];
        let outcomes = vec![
            outcome("E-001", vec![task("E001-T01", "Set up auth", &[])]),
            outcome("E-002", vec![task("E002-T01", "Bill the user", &["E001-T01"])]),
        ];
        let report = gather(&epics, &outcomes).unwrap();
        assert_eq!(report.tasks.len(), 2);
        assert_eq!(report.tasks[0].id, "T-001");
        assert_eq!(report.tasks[0].title, "Set up auth");
        assert_eq!(report.tasks[1].dependencies, vec!["T-001".to_string()]);
    }

    #[test]
    fn cross_epic_label_reference_resolves() {
        let epics = vec![epic("E-001", &[]), epic("E-002", &["E-001"])];
        let outcomes = vec![
            outcome("E-001", vec![task("E001-T01", "Set up auth", &[])]),
            outcome(
                "E-002",
                vec![task("E002-T01", "Bill the user", &["E-001:set-up-auth"])],
            ),
        ];
        let report = gather(&epics, &outcomes).unwrap();
        let billing = report.tasks.iter().find(|t| t.title == "Bill the user").unwrap();
        assert_eq!(billing.dependencies, vec!["T-001".to_string()]);
        assert!(report.unresolved_refs.is_empty());
    }

    #[test]
    fn duplicate_titles_are_merged_and_dependencies_unioned() {
        let epics = vec![epic("E-001", &[])];
        let outcomes = vec![outcome(
            "E-001",
            vec![
                task("E001-T01", "Set up auth", &[]),
                task("E001-T02", "set up AUTH", &["E001-T01"]),
            ],
        )];
        let report = gather(&epics, &outcomes).unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.duplicates_merged, 1);
    }

    #[test]
    fn unresolved_reference_is_reported_not_fatal() {
        let epics = vec![epic("E-001", &[])];
        let outcomes = vec![outcome(
            "E-001",
            vec![task("E001-T01", "Do thing", &["nonexistent-ref"])],
        )];
        let report = gather(&epics, &outcomes).unwrap();
        assert_eq!(report.unresolved_refs, vec!["nonexistent-ref".to_string()]);
    }

    #[test]
    fn cyclic_epic_dependencies_are_rejected() {
        let epics = vec![epic("E-001", &["E-002"]), epic("E-002", &["E-001"])];
        let err = gather(&epics, &[]).unwrap_err();
        assert!(matches!(err, RavenError::ValidationFailed(_)));
    }

    #[test]
    fn id_width_grows_past_three_digits() {
        assert_eq!(id_width(5), 3);
        assert_eq!(id_width(999), 3);
        assert_eq!(id_width(1000), 4);
    }

    #[test]
    fn emit_writes_per_task_files_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let epics = vec![epic("E-001", &[])];
        let outcomes = vec![outcome("E-001", vec![task("E001-T01", "Do thing", &[])])];
        let report = gather(&epics, &outcomes).unwrap();
        emit(dir.path(), &report).unwrap();
        assert!(dir.path().join("T-001.md").exists());
        assert!(dir.path().join("task-state.conf").exists());
        assert!(dir.path().join("phases.conf").exists());
        assert!(dir.path().join("INDEX.md").exists());
        assert!(dir.path().join("PROGRESS.md").exists());
    }
}
