mod cli;
mod commands;
mod config;
mod context;
mod logging;

use clap::Parser;

use cli::{Cli, Command, ConfigAction};
use context::CliContext;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let project_root = cli
        .dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().expect("reading current directory"));

    // `init` scaffolds raven.toml itself — it must not fail because one
    // doesn't exist yet.
    if let Command::Init { template, name, force } = cli.command {
        std::process::exit(commands::init::run(template, name, force, &project_root));
    }

    let loaded = match config::load(cli.config.as_deref(), &project_root) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("loading config: {e}");
            std::process::exit(commands::EXIT_ERROR);
        }
    };
    let project_root = loaded.project_root.clone();
    let ctx = CliContext::new(loaded, cli.dry_run, cli.no_color, project_root);

    let code = match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Version { json } => commands::version::run(json),
        Command::Completion { shell } => commands::completion::run(shell),
        Command::Config { action } => match action {
            ConfigAction::Debug => commands::config_cmd::debug(&ctx.config),
            ConfigAction::Validate => commands::config_cmd::validate(&ctx.config),
        },
        Command::Status { phase, json, verbose } => commands::status::run(&ctx, phase, json, verbose),
        Command::Implement {
            agent,
            phase,
            task,
            max_iterations,
            max_limit_waits,
            sleep,
            model,
        } => {
            commands::implement::run(&ctx, &agent, phase, task, max_iterations, max_limit_waits, sleep, model)
                .await
        }
        Command::Review { agents, concurrency, mode, base, output } => {
            commands::review::run(&ctx, &agents, concurrency, mode, &base, output).await
        }
        Command::Fix { agent, report, max_cycles } => {
            commands::fix::run(&ctx, &agent, &report, max_cycles).await
        }
        Command::Pr { base, agent } => commands::pr::run(&ctx, &base, agent.as_deref()).await,
        Command::Pipeline {
            phase,
            from_phase,
            implement_agent,
            review_agents,
            pr_agent,
            skip_implement,
            skip_review,
            skip_pr,
            interactive,
            base,
            sync_base,
        } => {
            commands::pipeline::run(
                &ctx,
                phase,
                from_phase,
                implement_agent,
                &review_agents,
                pr_agent,
                skip_implement,
                skip_review,
                skip_pr,
                interactive,
                &base,
                sync_base,
            )
            .await
        }
        Command::Prd { file, agent, output_dir, concurrency, single_pass } => {
            commands::prd::run(&ctx, &file, &agent, output_dir, concurrency, single_pass).await
        }
        Command::Resume { run, list, clean, clean_all } => {
            commands::resume::run(&ctx, run, list, clean, clean_all).await
        }
        Command::Dashboard => commands::dashboard::run(&ctx),
    };

    std::process::exit(code);
}
