//! Stub adapter: the "third stub returns 'not implemented' uniformly"
//! variant required by §4.1, used as the default for unconfigured agent
//! names and by tests that need a deterministic, subprocess-free [`Agent`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Agent, DryRunCommand, RateLimitInfo, RunOpts, RunResult};
use crate::error::{RavenError, RavenResult};

pub struct StubAdapter {
    name: String,
}

impl StubAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Agent for StubAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "unknown"
    }

    fn check_prerequisites(&self) -> RavenResult<()> {
        Err(RavenError::PrerequisiteMissing(format!(
            "agent '{}' is not configured; add an [agents.{}] section to raven.toml",
            self.name, self.name
        )))
    }

    fn dry_run_command(&self, _opts: &RunOpts) -> DryRunCommand {
        DryRunCommand {
            command_line: format!("# agent '{}' not implemented", self.name),
        }
    }

    async fn run(&self, _cancel: CancellationToken, _opts: RunOpts) -> RavenResult<RunResult> {
        Err(RavenError::PrerequisiteMissing(format!(
            "agent '{}' is not implemented",
            self.name
        )))
    }

    fn parse_rate_limit(&self, _output: &str) -> RateLimitInfo {
        RateLimitInfo::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_run_always_errors() {
        let agent = StubAdapter::new("ghost");
        let opts = RunOpts::new(".");
        let err = agent.run(CancellationToken::new(), opts).await.unwrap_err();
        assert!(matches!(err, RavenError::PrerequisiteMissing(_)));
    }

    #[test]
    fn stub_check_prerequisites_fails() {
        let agent = StubAdapter::new("ghost");
        assert!(agent.check_prerequisites().is_err());
    }
}
