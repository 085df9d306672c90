//! Generic state-machine workflow runner (§3, §4.5).
//!
//! A [`WorkflowDefinition`] is a named graph of [`StepDef`]s connected by
//! [`TransitionEvent`]s. A [`WorkflowEngine`] drives a [`WorkflowState`]
//! through that graph using handlers registered in a per-run
//! [`HandlerRegistry`], checkpointing after every transition and emitting
//! non-blocking lifecycle events. [`builtin`] holds the two workflows
//! that are always registered regardless of project configuration.

pub mod builtin;
pub mod definition;
pub mod engine;
pub mod registry;
pub mod state;
pub mod validate;

pub use definition::{
    is_terminal_step, StepDef, TransitionEvent, WorkflowDefinition, DONE_STEP, FAILED_STEP,
};
pub use engine::{EngineOptions, StepResult, WorkflowEngine};
pub use registry::{HandlerRegistry, StepContext, StepHandler};
pub use state::{StepRecord, WorkflowState};
pub use validate::{validate_definition, dry_run_plan, Severity, ValidationIssue, ValidationReport};
