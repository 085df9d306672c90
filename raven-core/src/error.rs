//! Error taxonomy shared by every component.
//!
//! Grounded on `harness::error::HarnessError`: a single
//! `thiserror` enum with one variant per failure kind, a `recovery_hint`
//! for human-facing reports, and an `is_retryable` classifier consulted by
//! the fan-out workers and the implementation loop. Unlike that error type,
//! this enum is not also serialized to an agent-facing `StructuredError`
//! wire type — Raven drives agents, agents never parse Raven's errors.

use std::path::PathBuf;

pub type RavenResult<T> = Result<T, RavenError>;

#[derive(Debug, thiserror::Error)]
pub enum RavenError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("rate limited by {provider}: retry after {wait_secs:.1}s")]
    RateLimited { provider: String, wait_secs: f64 },

    #[error("max rate-limit waits exceeded for {provider} ({waits} waits)")]
    MaxWaitsExceeded { provider: String, waits: u32 },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("subprocess failed: {command} exited {exit_code:?}: {detail}")]
    SubprocessFailed {
        command: String,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    IoPlain(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("step handler panicked: {0}")]
    PanicRecovered(String),

    #[error("partial success: {0}")]
    PartialSuccess(String),
}

impl RavenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn subprocess_failed(
        command: impl Into<String>,
        exit_code: Option<i32>,
        detail: impl Into<String>,
    ) -> Self {
        Self::SubprocessFailed {
            command: command.into(),
            exit_code,
            detail: detail.into(),
        }
    }

    /// True for errors a fan-out worker (review/PRD) or the implementation
    /// loop's rate-limit gate may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ValidationFailed(_) | Self::SubprocessFailed { .. }
        )
    }

    /// Exit code this error should map to at the CLI boundary (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 3,
            Self::PartialSuccess(_) => 2,
            _ => 1,
        }
    }

    /// Short human-facing recovery hint, analogous to
    /// `recovery_suggestion`.
    pub fn recovery_hint(&self) -> Option<&'static str> {
        match self {
            Self::PrerequisiteMissing(_) => {
                Some("Install the agent CLI and ensure it is on PATH.")
            }
            Self::RateLimited { .. } => Some("Raven will wait and retry automatically."),
            Self::MaxWaitsExceeded { .. } => {
                Some("Raise max-limit-waits or retry later once the provider resets.")
            }
            Self::ValidationFailed(_) => {
                Some("Inspect the agent's raw output; the JSON extractor found no valid candidate.")
            }
            Self::Cancelled => Some("Re-run `raven resume --run <id>` to continue from checkpoint."),
            Self::SubprocessFailed { .. } => Some("Check the command's captured stderr."),
            _ => None,
        }
    }
}
