use clap::Parser;

mod cli;
mod commands;

use cli::{BranchCommand, Cli, Commands, CommitCommand, PackagesCommand, RepoCommand, WorkflowCommand};
use commands::AppContext;

fn main() {
    let cli = Cli::parse();

    // --debug turns on command tracing; otherwise RUST_LOG decides.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "off" }),
    )
    .format_timestamp(None)
    .init();

    if let Err(err) = run(&cli) {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let ctx = AppContext::from_cli(cli)?;

    match &cli.command {
        Commands::Audit { roots, all } => commands::handle_audit(&ctx, roots.clone(), *all),
        Commands::Cd { branch, stash, commit, require_clean } => {
            commands::handle_cd(&ctx, branch.clone(), *stash, *commit, *require_clean)
        }
        Commands::Workflow { command } => match command {
            WorkflowCommand::Run { file } => commands::handle_workflow_run(&ctx, file),
        },
        Commands::Commit { command } => match command {
            CommitCommand::Message {
                diff_source,
                model,
                api_key_env,
                max_tokens,
                temperature,
                timeout_seconds,
                chat_command,
            } => commands::handle_commit_message(
                &ctx,
                diff_source.as_str(),
                model.clone(),
                api_key_env.clone(),
                *max_tokens,
                *temperature,
                *timeout_seconds,
                chat_command.clone(),
            ),
        },
        Commands::Branch { command } => match command {
            BranchCommand::Default { target, delete_old } => {
                commands::handle_branch_default(&ctx, target.clone(), *delete_old)
            }
        },
        Commands::Repo { command } => match command {
            RepoCommand::Packages { command } => match command {
                PackagesCommand::Purge { package, dry_run, page_size, org } => {
                    commands::handle_packages_purge(&ctx, package.clone(), *dry_run, *page_size, *org)
                }
            },
        },
    }
}
