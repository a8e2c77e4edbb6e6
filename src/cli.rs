//! Command-line surface for `gf`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "gf",
    version,
    about = "Fleet-oriented Git maintenance: discover repositories, plan typed tasks, run them through git and gh",
    propagate_version = true
)]
pub struct Cli {
    /// Root directories to discover repositories under (also GITFLEET_ROOTS,
    /// colon-separated).
    #[arg(long, global = true, value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Answer yes to every confirmation prompt.
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Enable debug logging of every external command.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Worker pool size for workflow execution (default 1, capped at 32).
    #[arg(long, global = true, value_name = "N")]
    pub workflow_workers: Option<usize>,

    /// Remote name override (default origin; also GITFLEET_REMOTE).
    #[arg(long, global = true, value_name = "NAME")]
    pub remote: Option<String>,

    /// Stop dispatching new work after this many seconds and return the
    /// partial outcome (also GITFLEET_TIMEOUT_SECS).
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub run_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a CSV audit of every discovered repository to stdout.
    Audit {
        /// Roots to audit; defaults to --roots / GITFLEET_ROOTS.
        #[arg(id = "audit_roots", value_name = "ROOT")]
        roots: Vec<PathBuf>,

        /// Include repositories whose metadata cannot be resolved.
        #[arg(long)]
        all: bool,
    },

    /// Switch branches across the fleet.
    Cd {
        /// Branch to switch to; defaults to each repository's remote
        /// default branch.
        branch: Option<String>,

        /// Stash tracked changes before switching and pop afterwards.
        #[arg(long, conflicts_with = "commit")]
        stash: bool,

        /// Commit tracked changes before switching.
        #[arg(long)]
        commit: bool,

        /// Skip the refresh instead of pulling when the worktree is dirty.
        #[arg(long, value_name = "BOOL")]
        require_clean: Option<bool>,
    },

    /// Execute a workflow task file.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Commit helpers.
    Commit {
        #[command(subcommand)]
        command: CommitCommand,
    },

    /// Branch maintenance.
    Branch {
        #[command(subcommand)]
        command: BranchCommand,
    },

    /// Repository-level GitHub maintenance.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Run the tasks declared in a YAML task file.
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DiffSourceArg {
    Staged,
    Worktree,
}

impl DiffSourceArg {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffSourceArg::Staged => "staged",
            DiffSourceArg::Worktree => "worktree",
        }
    }
}

#[derive(Subcommand)]
pub enum CommitCommand {
    /// Generate a commit message for the current repository.
    Message {
        /// Which diff to describe.
        #[arg(long, value_enum, default_value = "staged")]
        diff_source: DiffSourceArg,

        /// Model identifier passed to the chat command.
        #[arg(long, value_name = "M")]
        model: Option<String>,

        /// Environment variable holding the API key.
        #[arg(long, value_name = "ENV")]
        api_key_env: Option<String>,

        /// Completion token cap.
        #[arg(long, value_name = "N")]
        max_tokens: Option<u32>,

        /// Sampling temperature.
        #[arg(long, value_name = "T")]
        temperature: Option<f32>,

        /// Per-request timeout.
        #[arg(long, value_name = "S")]
        timeout_seconds: Option<u64>,

        /// Chat CLI to invoke (prompt is piped to stdin).
        #[arg(long, value_name = "CMD", default_value = "llm")]
        chat_command: String,
    },
}

#[derive(Subcommand)]
pub enum BranchCommand {
    /// Migrate the default branch of the current repository.
    Default {
        #[arg(value_name = "TARGET")]
        target: String,

        /// Delete the old default branch on the remote after migrating.
        #[arg(long)]
        delete_old: bool,
    },
}

#[derive(Subcommand)]
pub enum RepoCommand {
    /// Container-package maintenance on GHCR.
    Packages {
        #[command(subcommand)]
        command: PackagesCommand,
    },
}

#[derive(Subcommand)]
pub enum PackagesCommand {
    /// Delete untagged container versions of a package.
    Purge {
        /// Package name; defaults to the repository name.
        #[arg(long, value_name = "P")]
        package: Option<String>,

        /// Count deletions without performing them.
        #[arg(long)]
        dry_run: bool,

        /// REST page size.
        #[arg(long, value_name = "N", default_value_t = 100)]
        page_size: usize,

        /// Treat the owner as an organization instead of a user.
        #[arg(long)]
        org: bool,
    },
}
