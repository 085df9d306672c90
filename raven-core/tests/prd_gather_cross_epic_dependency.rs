//! End-to-end (Stage 3 only — deterministic, no agents): merging two
//! epics with a cross-epic dependency reference (spec §8 scenario 4 —
//! "PRD merge with cross-epic dep").
//!
//! E-001 has two tasks (temp ids E001-T01, E001-T02); E-002 has one
//! task (E002-T01) whose dependency is the cross-epic label
//! "E-001:setup-db", matching E001-T01's title "Setup DB". After
//! gather: tasks are renamed T-001/T-002/T-003 in topological-then-
//! emission order, T-003 depends on [T-001], and the DAG validates.

use raven_core::prd::gather_tasks;
use raven_core::prd::{Epic, ScatterOutcome, TaskDef};

fn epic(id: &str, title: &str, deps: &[&str]) -> Epic {
    Epic {
        id: id.to_string(),
        title: title.to_string(),
        summary: String::new(),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

fn task_def(id: &str, title: &str, deps: &[&str]) -> TaskDef {
    TaskDef {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        acceptance_criteria: Vec::new(),
    }
}

#[tokio::test]
async fn gather_resolves_cross_epic_dependency_and_renumbers_globally() {
    let epics = vec![epic("E-001", "Foundations", &[]), epic("E-002", "API", &[])];
    let outcomes = vec![
        ScatterOutcome {
            epic_id: "E-001".to_string(),
            tasks: vec![
                task_def("E001-T01", "Setup DB", &[]),
                task_def("E001-T02", "Seed DB", &["E001-T01"]),
            ],
            validation_exhausted: false,
            error: None,
        },
        ScatterOutcome {
            epic_id: "E-002".to_string(),
            tasks: vec![task_def("E002-T01", "Expose REST endpoint", &["E-001:setup-db"])],
            validation_exhausted: false,
            error: None,
        },
    ];

    let report = gather_tasks(&epics, &outcomes).unwrap();

    assert_eq!(report.tasks.len(), 3);
    let ids: Vec<&str> = report.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["T-001", "T-002", "T-003"]);

    let setup_db = report.tasks.iter().find(|t| t.title == "Setup DB").unwrap();
    assert_eq!(setup_db.id, "T-001");

    let rest_endpoint = report
        .tasks
        .iter()
        .find(|t| t.title == "Expose REST endpoint")
        .unwrap();
    assert_eq!(rest_endpoint.id, "T-003");
    assert_eq!(rest_endpoint.dependencies, vec!["T-001".to_string()]);

    assert!(report.unresolved_refs.is_empty());
    assert!(report.ambiguous_refs.is_empty());
}
