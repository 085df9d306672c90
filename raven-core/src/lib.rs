//! Orchestration substrate for Raven: a command-center that drives
//! long-running software-engineering pipelines composed of calls to
//! external AI coding agents, interleaved with git operations and local
//! verification commands.
//!
//! # Components (leaves first)
//!
//! - [`agent`]: uniform contract over external AI coder processes
//! - [`rate_limit`]: process-wide per-provider wait/release coordination
//! - [`stream`]: JSONL decoder for agent subprocess stdout
//! - [`json_extract`]: tolerant structured-object recovery from freeform text
//! - [`git`]: thin verb wrapper around a git CLI
//! - [`verify`]: timeout-bounded shell command execution
//! - [`task`]: task spec parsing, on-disk status tracking, selection
//! - [`workflow`]: a generic state-machine runner with checkpointing
//! - [`implement`]: the per-task implementation loop
//! - [`review`]: multi-agent review fan-out and consolidation
//! - [`prd`]: PRD decomposition scatter/gather pipeline
//! - [`pipeline`]: multi-phase orchestration chaining the above over branches

#![allow(dead_code)]

pub mod config;
pub mod error;
pub mod events;

pub mod agent;
pub mod rate_limit;
pub mod stream;

pub mod json_extract;
pub mod git;
pub mod verify;

pub mod task;
pub mod workflow;
pub mod implement;
pub mod review;
pub mod prd;
pub mod pipeline;

mod atomic;

pub use error::{RavenError, RavenResult};
pub use events::{Event, EventBus, EventReceiver};

pub use agent::{Agent, AgentRegistry, DryRunCommand, RateLimitInfo, RunOpts, RunResult};
pub use rate_limit::{BackoffPolicy, ProviderState, RateLimitCoordinator};
pub use stream::{StreamDecoder, StreamEvent};

pub use task::{Phase, PhaseConfig, Task, TaskSelector, TaskStateStore, TaskStatus};
pub use workflow::{
    HandlerRegistry, StepRecord, StepResult as WorkflowStepResult, TransitionEvent,
    ValidationReport, WorkflowDefinition, WorkflowEngine, WorkflowState,
};
pub use implement::{ImplementationLoop, LoopConfig, LoopOutcome};
pub use review::{ConsolidationStats, Finding, ReviewPipeline, ReviewRequest, Severity, Verdict};
pub use prd::{PrdPipeline, PrdRequest};
pub use pipeline::{PipelineOrchestrator, PipelinePlan};
