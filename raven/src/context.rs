//! Per-invocation context threaded into every subcommand handler:
//! resolved config, global flags, and the shared process-wide
//! primitives (git surface, rate-limit coordinator, agent registry)
//! built fresh for this run (§9: no process-wide singletons).

use std::path::PathBuf;
use std::sync::Arc;

use raven_core::agent::AgentRegistry;
use raven_core::git::GitSurface;
use raven_core::rate_limit::{BackoffPolicy, RateLimitCoordinator};
use raven_core::task::{PhaseConfig, TaskStateStore};
use tokio_util::sync::CancellationToken;

use crate::config::LoadedConfig;

pub struct CliContext {
    pub config: LoadedConfig,
    pub dry_run: bool,
    pub no_color: bool,
    pub project_root: PathBuf,
    pub cancel: CancellationToken,
}

impl CliContext {
    pub fn new(config: LoadedConfig, dry_run: bool, no_color: bool, project_root: PathBuf) -> Self {
        Self {
            config,
            dry_run,
            no_color,
            project_root,
            cancel: CancellationToken::new(),
        }
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.resolved.project.tasks_dir)
    }

    pub fn task_state_path(&self) -> PathBuf {
        self.project_root.join(&self.config.resolved.project.task_state_file)
    }

    pub fn phases_path(&self) -> PathBuf {
        self.project_root.join(&self.config.resolved.project.phases_conf)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.project_root.join(".raven").join("state")
    }

    pub fn git(&self) -> GitSurface {
        GitSurface::new(&self.project_root)
    }

    pub fn agent_registry(&self) -> AgentRegistry {
        AgentRegistry::from_config(&self.config.resolved.agents)
    }

    pub fn coordinator(&self) -> Arc<RateLimitCoordinator> {
        Arc::new(RateLimitCoordinator::new(BackoffPolicy {
            max_waits: self.config.resolved.max_limit_waits,
            ..BackoffPolicy::default()
        }))
    }

    pub fn state_store(&self) -> anyhow::Result<Arc<TaskStateStore>> {
        Ok(Arc::new(TaskStateStore::load(self.task_state_path())?))
    }

    pub fn phase_config(&self) -> anyhow::Result<PhaseConfig> {
        Ok(PhaseConfig::load(&self.phases_path())?)
    }

    /// Installs a Ctrl-C handler that trips `cancel` (§5: root
    /// cancellation token propagated through every blocking primitive).
    pub fn spawn_ctrl_c_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
}
