//! Clap derive definitions for the `raven` CLI surface (§6).
//!
//! Parsing only lives here — every subcommand handler immediately turns
//! its `Args` struct into `raven-core` request types and hands off.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "raven", author, version, about = "AI-workflow orchestration command-center", long_about = None)]
pub struct Cli {
    /// Path to raven.toml. Defaults to walking upward from the CWD.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root (defaults to CWD).
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[arg(long, global = true)]
    pub dry_run: bool,

    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scaffold a new project.
    Init {
        template: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Print build info.
    Version {
        #[arg(long)]
        json: bool,
    },
    /// Emit a shell completion script.
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Resolved config with source annotations, or a validation report.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Per-phase progress.
    Status {
        #[arg(long)]
        phase: Option<i64>,
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Run the implementation loop.
    Implement {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        phase: Option<i64>,
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        max_limit_waits: Option<u32>,
        #[arg(long)]
        sleep: Option<u64>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Multi-agent review of a git diff.
    Review {
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long, value_enum, default_value_t = ReviewModeArg::All)]
        mode: ReviewModeArg,
        #[arg(long, default_value = "main")]
        base: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Apply fixes for a consolidated review report.
    Fix {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        report: PathBuf,
        #[arg(long, default_value_t = 3)]
        max_cycles: u32,
    },
    /// Create a pull request from the current branch.
    Pr {
        #[arg(long, default_value = "main")]
        base: String,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Run the full phase chain.
    Pipeline {
        #[arg(long)]
        phase: Option<i64>,
        #[arg(long)]
        from_phase: Option<i64>,
        #[arg(long)]
        implement_agent: Option<String>,
        #[arg(long, value_delimiter = ',')]
        review_agents: Vec<String>,
        #[arg(long)]
        pr_agent: Option<String>,
        #[arg(long)]
        skip_implement: bool,
        #[arg(long)]
        skip_review: bool,
        #[arg(long)]
        skip_pr: bool,
        #[arg(long)]
        interactive: bool,
        #[arg(long, default_value = "main")]
        base: String,
        #[arg(long)]
        sync_base: bool,
    },
    /// Decompose a PRD into a globally-numbered task tree.
    Prd {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        single_pass: bool,
    },
    /// List, resume, or clean persisted workflow runs.
    Resume {
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        list: bool,
        #[arg(long)]
        clean: bool,
        #[arg(long)]
        clean_all: bool,
    },
    /// Launch the interactive dashboard (out of scope: the TUI itself
    /// lives outside this crate per §1; this prints the data it would
    /// render).
    Dashboard,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Debug,
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReviewModeArg {
    All,
    Split,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl From<Shell> for clap_complete::Shell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::Powershell => clap_complete::Shell::PowerShell,
        }
    }
}
