//! PRD Decomposition pipeline: shred a product document into epics,
//! scatter each epic to a worker for task expansion, then gather every
//! worker's output into one globally-numbered task set (§4.8).
//!
//! Three stages, grounded respectively on the retry-with-feedback loop
//! already established in the review pipeline's fix engine, the
//! bounded [`crate::review`] fan-out, and
//! [`crate::task::phase::PhaseConfig`]'s on-disk shapes for the
//! gather stage's output.

mod gather;
mod scatter;
mod shred;
pub mod types;

pub use gather::gather as gather_tasks;
pub use gather::emit as emit_gathered_tasks;
pub use scatter::scatter as scatter_epics;
pub use shred::shred as shred_prd;
pub use types::{Epic, EpicBreakdown, EpicTasks, GatherReport, GatheredTask, ScatterOutcome, TaskDef};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::RavenResult;
use crate::events::{Event, EventBus, EventKind};
use crate::rate_limit::RateLimitCoordinator;

/// Inputs to a full PRD decomposition run.
#[derive(Debug, Clone)]
pub struct PrdRequest {
    pub run_id: String,
    pub prd_text: String,
    pub working_directory: PathBuf,
    /// Where per-epic scatter output files and the final task tree are
    /// written.
    pub work_directory: PathBuf,
    pub tasks_directory: PathBuf,
    pub scatter_concurrency: usize,
    pub max_retries: u32,
}

impl PrdRequest {
    pub fn new(
        run_id: impl Into<String>,
        prd_text: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        tasks_directory: impl Into<PathBuf>,
    ) -> Self {
        let working_directory = working_directory.into();
        let work_directory = working_directory.join(".raven").join("prd-work");
        Self {
            run_id: run_id.into(),
            prd_text: prd_text.into(),
            working_directory,
            work_directory,
            tasks_directory: tasks_directory.into(),
            scatter_concurrency: 4,
            max_retries: 2,
        }
    }
}

/// Outcome of a full decomposition run: the gather report plus any
/// epics whose scatter worker exhausted its retries without producing
/// usable tasks (non-fatal per §4.8 Stage 2).
#[derive(Debug, Clone)]
pub struct PrdOutcome {
    pub epics: Vec<Epic>,
    pub report: GatherReport,
    pub failed_epics: Vec<String>,
}

/// Orchestrates the shred -> scatter -> gather chain and emits the
/// resulting task tree to disk.
pub struct PrdPipeline {
    agent: Arc<dyn Agent>,
    coordinator: Arc<RateLimitCoordinator>,
    events: Option<EventBus>,
}

impl PrdPipeline {
    pub fn new(agent: Arc<dyn Agent>, coordinator: Arc<RateLimitCoordinator>) -> Self {
        Self {
            agent,
            coordinator,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, run_id: &str, kind: EventKind) {
        if let Some(bus) = &self.events {
            bus.emit(Event::new(run_id, kind));
        }
    }

    pub async fn run(&self, cancel: CancellationToken, request: &PrdRequest) -> RavenResult<PrdOutcome> {
        self.emit(&request.run_id, EventKind::PrdShredStarted);
        let breakdown = shred::shred(
            &self.agent,
            cancel.clone(),
            &request.working_directory,
            &request.prd_text,
            request.max_retries,
        )
        .await?;
        self.emit(
            &request.run_id,
            EventKind::PrdShredCompleted {
                epic_count: breakdown.epics.len(),
            },
        );

        let outcomes = scatter::scatter(
            self.agent.clone(),
            self.coordinator.clone(),
            cancel.clone(),
            &request.working_directory,
            &request.work_directory,
            &request.prd_text,
            &breakdown.epics,
            request.scatter_concurrency,
            request.max_retries,
        )
        .await?;

        for outcome in &outcomes {
            self.emit(
                &request.run_id,
                EventKind::PrdScatterWorkerCompleted {
                    epic_id: outcome.epic_id.clone(),
                    task_count: outcome.tasks.len(),
                },
            );
        }

        let failed_epics: Vec<String> = outcomes
            .iter()
            .filter(|o| o.validation_exhausted || (o.error.is_some() && o.tasks.is_empty()))
            .map(|o| o.epic_id.clone())
            .collect();

        let report = gather::gather(&breakdown.epics, &outcomes)?;
        self.emit(
            &request.run_id,
            EventKind::PrdGatherCompleted {
                task_count: report.tasks.len(),
            },
        );

        gather::emit(&request.tasks_directory, &report)?;

        Ok(PrdOutcome {
            epics: breakdown.epics,
            report,
            failed_epics,
        })
    }
}

/// Convenience path helper: where a [`PrdRequest`] defaults its scatter
/// work directory relative to a project root.
pub fn default_work_directory(project_root: &Path) -> PathBuf {
    project_root.join(".raven").join("prd-work")
}
