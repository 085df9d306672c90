//! Pipeline Orchestrator (§4.9): chains implement -> review/fix -> pr
//! across a sequence of phases, each on its own git branch.
//!
//! Composes two already-built engines per phase — [`ImplementationLoop`]
//! and a [`WorkflowEngine`] over [`review_fix_workflow`] — rather than
//! expressing the whole chain as one step graph: switching branches and
//! handing off between two independently-checkpointed sub-engines does
//! not fit a single declarative graph the way one phase's work does.
//! Progress is persisted as a [`PipelineMetadata`] blob inside the run's
//! own [`WorkflowState`] (keyed by [`PipelineMetadata::METADATA_KEY`]),
//! so a `raven pipeline` run's state file stays a single coherent
//! record alongside any other workflow the caller inspects it next to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};
use crate::git::GitSurface;
use crate::implement::{ImplementationLoop, LoopConfig, LoopOutcome};
use crate::rate_limit::RateLimitCoordinator;
use crate::review::{ReviewMode, ReviewRequest};
use crate::task::{PhaseConfig, Task, TaskStateStore};
use crate::verify::{VerificationRunner, VerifyConfig};
use crate::workflow::builtin::review_fix_workflow;
use crate::workflow::{EngineOptions, HandlerRegistry, WorkflowEngine, WorkflowState};

use super::handlers::{FixHandler, PrHandler, ReviewFixShared, ReviewHandler};
use super::types::{PhaseMetadata, PhasePlan, PipelineMetadata, PipelinePlan};

pub const PIPELINE_WORKFLOW: &str = "pipeline";

/// Everything one orchestrator run needs, besides the plan itself.
pub struct PipelineContext {
    pub tasks: Vec<Task>,
    pub state_store: Arc<TaskStateStore>,
    pub phases: PhaseConfig,
    pub implement_agent: Arc<dyn Agent>,
    pub review_agents: Vec<Arc<dyn Agent>>,
    pub pr_agent: Arc<dyn Agent>,
    pub coordinator: Arc<RateLimitCoordinator>,
    pub git: GitSurface,
    pub events: Option<EventBus>,
    pub project_brief: String,
    pub review_rules: String,
    pub checkpoint_dir: PathBuf,
}

/// Per-phase result returned to the caller alongside the persisted
/// [`PipelineMetadata`].
#[derive(Debug, Clone)]
pub struct PhaseRunOutcome {
    pub phase: PhaseMetadata,
}

pub struct PipelineOrchestrator {
    context: PipelineContext,
    plan: PipelinePlan,
}

impl PipelineOrchestrator {
    pub fn new(context: PipelineContext, plan: PipelinePlan) -> Self {
        Self { context, plan }
    }

    fn emit(&self, run_id: &str, kind: EventKind) {
        if let Some(bus) = &self.context.events {
            bus.emit(Event::new(run_id, kind));
        }
    }

    /// List the steps a full run would take without touching git, the
    /// agent fleet, or the filesystem beyond reading the plan (§4.9
    /// "dry-run walks the planned phase sequence").
    pub fn dry_run(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for phase in &self.plan.phases {
            let branch = self.plan.branch_name(phase);
            lines.push(format!("phase {} '{}' -> branch {}", phase.id, phase.name, branch));
            if !self.plan.skip_implement {
                lines.push(format!("  implement (phase_id={})", phase.id));
            } else {
                lines.push("  implement: skipped".to_string());
            }
            if !self.plan.skip_review {
                lines.push("  review -> fix -> pr (review_fix_workflow)".to_string());
            } else {
                lines.push("  review/fix/pr: skipped".to_string());
            }
        }
        lines
    }

    /// Run every phase in `plan.phases`, in order, resuming from the
    /// first phase that is neither `Completed` nor `Skipped` in a
    /// previously-persisted [`PipelineMetadata`] (§4.9 resume support).
    pub async fn run(&self, run_id: &str, cancel: CancellationToken) -> RavenResult<PipelineMetadata> {
        let mut state = WorkflowState::load(&self.context.checkpoint_dir, run_id)
            .unwrap_or_else(|_| WorkflowState::new(run_id, PIPELINE_WORKFLOW, "running"));

        let mut metadata = read_metadata(&state);
        if metadata.phases.is_empty() {
            metadata.phases = self
                .plan
                .phases
                .iter()
                .map(|p| PhaseMetadata {
                    id: p.id,
                    name: p.name.clone(),
                    status: super::types::PhaseStatus::Pending,
                    duration_ns: 0,
                    branch: self.plan.branch_name(p),
                    pr_url: None,
                })
                .collect();
            write_metadata(&mut state, &metadata);
            state.save(&self.context.checkpoint_dir)?;
        }

        let start_index = metadata.first_incomplete_index();
        let mut previous_branch: Option<String> = None;

        for (index, phase) in self.plan.phases.iter().enumerate() {
            if index < start_index {
                previous_branch = Some(self.plan.branch_name(phase));
                continue;
            }
            if cancel.is_cancelled() {
                return Err(RavenError::Cancelled);
            }

            let branch = self.plan.branch_name(phase);
            self.emit(
                run_id,
                EventKind::PipelinePhaseStarted {
                    phase_id: phase.id,
                    branch: branch.clone(),
                },
            );

            let base = if self.plan.chain_from_previous {
                previous_branch.clone().unwrap_or_else(|| self.plan.base_branch.clone())
            } else {
                self.plan.base_branch.clone()
            };
            self.context.git.checkout_or_create(&cancel, &branch, Some(&base)).await?;

            let started = Instant::now();
            let outcome = self.run_phase(run_id, &cancel, phase, &branch, &base).await;
            let duration_ns = started.elapsed().as_nanos() as u64;

            let status = match &outcome {
                Ok(()) => super::types::PhaseStatus::Completed,
                Err(_) => super::types::PhaseStatus::Failed,
            };
            if let Some(entry) = metadata.phases.iter_mut().find(|p| p.id == phase.id) {
                entry.status = status;
                entry.duration_ns = duration_ns;
                entry.branch = branch.clone();
            }
            write_metadata(&mut state, &metadata);
            state.save(&self.context.checkpoint_dir)?;

            self.emit(
                run_id,
                EventKind::PipelinePhaseCompleted {
                    phase_id: phase.id,
                    status: format!("{status:?}"),
                },
            );

            outcome?;
            previous_branch = Some(branch);
        }

        Ok(metadata)
    }

    async fn run_phase(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
        phase: &PhasePlan,
        branch: &str,
        base: &str,
    ) -> RavenResult<()> {
        if !self.plan.skip_implement {
            let config = LoopConfig {
                phase_id: Some(phase.id),
                project_name: self.context.project_brief.clone(),
                verification_commands: self.plan.verification_commands.clone(),
                checkpoint_dir: Some(self.context.checkpoint_dir.clone()),
                ..LoopConfig::default()
            };

            let loop_engine = ImplementationLoop::new(
                self.context.tasks.clone(),
                self.context.state_store.clone(),
                self.context.phases.clone(),
                self.context.implement_agent.clone(),
                self.context.coordinator.clone(),
                GitSurface::new(self.context.git.working_dir()),
                self.context.events.clone(),
                config,
            )?;

            let implement_run_id = format!("{run_id}-phase-{}-implement", phase.id);
            match loop_engine.run(implement_run_id, cancel.clone()).await? {
                LoopOutcome::PhaseComplete { .. } | LoopOutcome::Exhausted { .. } => {}
                LoopOutcome::TaskBlocked { task_id, reason } => {
                    return Err(RavenError::InvalidInput(format!(
                        "phase {} blocked on task {task_id}: {reason}",
                        phase.id
                    )));
                }
                LoopOutcome::Failed { reason } => {
                    return Err(RavenError::InvalidInput(format!("phase {} implementation failed: {reason}", phase.id)));
                }
            }
        }

        if self.plan.skip_review {
            return Ok(());
        }

        let review_request = ReviewRequest {
            base_ref: base.to_string(),
            agents: self.plan.review_agents.clone(),
            concurrency: self.context.review_agents.len().max(1),
            mode: ReviewMode::All,
            project_brief: self.context.project_brief.clone(),
            rules: self.context.review_rules.clone(),
            extensions: regex::Regex::new(r".*").expect("universal extension matcher"),
            risk_patterns: Vec::new(),
            diff_ceiling_bytes: crate::review::DEFAULT_DIFF_CEILING_BYTES,
        };

        let review_pipeline = crate::review::ReviewPipeline::new(
            GitSurface::new(self.context.git.working_dir()),
            self.context.review_agents.clone(),
            self.context.events.clone(),
        );
        let fix_engine = crate::review::FixEngine::new(
            self.context.implement_agent.clone(),
            self.context.coordinator.clone(),
            VerificationRunner::new(self.context.git.working_dir(), VerifyConfig::default()),
            self.plan.max_fix_cycles,
        );

        let shared = Arc::new(ReviewFixShared::new(
            review_pipeline,
            review_request,
            fix_engine,
            self.plan.verification_commands.clone(),
            GitSurface::new(self.context.git.working_dir()),
            self.context.pr_agent.clone(),
            base.to_string(),
            branch.to_string(),
            self.plan.skip_pr,
            self.context.events.clone(),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register("review", Arc::new(ReviewHandler(shared.clone())));
        registry.register("fix", Arc::new(FixHandler(shared.clone())));
        registry.register("pr", Arc::new(PrHandler(shared.clone())));

        let engine = WorkflowEngine::new(
            review_fix_workflow()?,
            registry,
            EngineOptions {
                checkpoint_dir: Some(self.context.checkpoint_dir.clone()),
                events: self.context.events.clone(),
            },
        );

        let review_run_id = format!("{run_id}-phase-{}-review", phase.id);
        let result = engine.run(review_run_id, cancel.clone(), Default::default()).await?;
        if !result.succeeded {
            let reason = result
                .state
                .step_history
                .last()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "review/fix/pr workflow reached __failed__".to_string());
            return Err(RavenError::InvalidInput(format!("phase {} review/fix failed: {reason}", phase.id)));
        }
        Ok(())
    }
}

fn read_metadata(state: &WorkflowState) -> PipelineMetadata {
    state
        .metadata
        .get(PipelineMetadata::METADATA_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn write_metadata(state: &mut WorkflowState, metadata: &PipelineMetadata) {
    state.metadata.insert(
        PipelineMetadata::METADATA_KEY.to_string(),
        serde_json::to_value(metadata).expect("PipelineMetadata always serializes"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::StubAdapter;
    use tempfile::tempdir;

    fn empty_context(dir: &std::path::Path) -> PipelineContext {
        PipelineContext {
            tasks: vec![],
            state_store: Arc::new(TaskStateStore::load(dir.join("task-state.conf")).unwrap()),
            phases: PhaseConfig::default(),
            implement_agent: Arc::new(StubAdapter::new("stub")),
            review_agents: vec![],
            pr_agent: Arc::new(StubAdapter::new("stub")),
            coordinator: Arc::new(RateLimitCoordinator::default()),
            git: GitSurface::new(dir),
            events: None,
            project_brief: String::new(),
            review_rules: String::new(),
            checkpoint_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn plan_with_no_phases_dry_runs_to_empty_lines() {
        let dir = tempdir().unwrap();
        let plan = PipelinePlan {
            phases: vec![],
            branch_template: "phase/{id}-{slug}".to_string(),
            base_branch: "main".to_string(),
            chain_from_previous: true,
            skip_implement: false,
            skip_review: false,
            skip_pr: false,
            review_agents: vec![],
            verification_commands: vec![],
            max_fix_cycles: 3,
        };
        let orchestrator = PipelineOrchestrator::new(empty_context(dir.path()), plan);
        assert!(orchestrator.dry_run().is_empty());
    }

    #[test]
    fn dry_run_lists_each_phase_and_its_stages() {
        let dir = tempdir().unwrap();
        let plan = PipelinePlan {
            phases: vec![PhasePlan { id: 1, name: "Core Auth".to_string() }],
            branch_template: "phase/{id}-{slug}".to_string(),
            base_branch: "main".to_string(),
            chain_from_previous: false,
            skip_implement: false,
            skip_review: true,
            skip_pr: true,
            review_agents: vec![],
            verification_commands: vec![],
            max_fix_cycles: 3,
        };
        let orchestrator = PipelineOrchestrator::new(empty_context(dir.path()), plan);
        let lines = orchestrator.dry_run();
        assert!(lines[0].contains("phase/1-core-auth"));
        assert!(lines.iter().any(|l| l.contains("review/fix/pr: skipped")));
    }
}
