//! Command handlers for the `gf` binary.

mod audit;
mod branch;
mod commit;
mod packages;
mod switch;
mod workflow;

pub use audit::handle_audit;
pub use branch::handle_branch_default;
pub use commit::handle_commit_message;
pub use packages::handle_packages_purge;
pub use switch::handle_cd;
pub use workflow::handle_workflow_run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use gitfleet::confirm::{LockedPrompter, Prompter, TerminalPrompter};
use gitfleet::domain::{RemoteName, RepositoryPath};
use gitfleet::fsys::StdFileSystem;
use gitfleet::report::Reporter;
use gitfleet::shell_exec::{CommandDetails, GitExecutor, LogStyle, ShellExecutor};
use gitfleet::workflow::runner::TaskRunner;
use gitfleet::workflow::RuntimeOptions;

use crate::cli::Cli;

/// Environment variable overrides recognized by the binary.
const ENV_ROOTS: &str = "GITFLEET_ROOTS";
const ENV_REMOTE: &str = "GITFLEET_REMOTE";
const ENV_WORKERS: &str = "GITFLEET_WORKERS";
const ENV_ASSUME_YES: &str = "GITFLEET_ASSUME_YES";
const ENV_TIMEOUT: &str = "GITFLEET_TIMEOUT_SECS";

/// Shared wiring for every subcommand.
pub struct AppContext {
    pub exec: Arc<dyn GitExecutor>,
    pub reporter: Arc<Reporter>,
    pub prompter: Arc<dyn Prompter>,
    pub options: RuntimeOptions,
    pub roots: Vec<PathBuf>,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let exec: Arc<dyn GitExecutor> = Arc::new(ShellExecutor::new(LogStyle::Human));
        let reporter = Arc::new(Reporter::new());
        let prompter: Arc<dyn Prompter> = Arc::new(LockedPrompter::new(TerminalPrompter));

        let assume_yes = cli.yes
            || std::env::var(ENV_ASSUME_YES)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
        let workers = match cli.workflow_workers {
            Some(workers) => workers,
            None => std::env::var(ENV_WORKERS)
                .ok()
                .map(|v| v.parse().context("GITFLEET_WORKERS must be a positive integer"))
                .transpose()?
                .unwrap_or(gitfleet::workflow::DEFAULT_WORKERS),
        };
        let remote = match cli.remote.clone().or_else(|| std::env::var(ENV_REMOTE).ok()) {
            Some(name) => Some(RemoteName::new(name).map_err(anyhow::Error::new)?),
            None => None,
        };
        let timeout_secs: Option<u64> = match cli.run_timeout {
            Some(secs) => Some(secs),
            None => std::env::var(ENV_TIMEOUT)
                .ok()
                .map(|v| v.parse().context("GITFLEET_TIMEOUT_SECS must be a positive integer"))
                .transpose()?,
        };
        if timeout_secs == Some(0) {
            anyhow::bail!("GITFLEET_TIMEOUT_SECS must be positive");
        }
        let timeout = timeout_secs.map(std::time::Duration::from_secs);

        Ok(Self {
            exec,
            reporter,
            prompter,
            options: RuntimeOptions { assume_yes, workers, remote, timeout },
            roots: resolve_roots(&cli.roots),
        })
    }

    pub fn runner(&self) -> TaskRunner {
        TaskRunner::new(
            Arc::clone(&self.exec),
            Arc::new(StdFileSystem),
            Arc::clone(&self.reporter),
            Arc::clone(&self.prompter),
            None,
        )
    }

    /// Worktree root of the repository containing the current directory.
    pub fn current_repository(&self) -> anyhow::Result<RepositoryPath> {
        let output = self
            .exec
            .execute_git(CommandDetails::new(["rev-parse", "--show-toplevel"]))
            .context("not inside a Git repository")?;
        RepositoryPath::new(output.stdout.trim()).map_err(anyhow::Error::new)
    }
}

/// Roots resolve from flags, then `GITFLEET_ROOTS` (colon-separated), then
/// the current directory.
fn resolve_roots(flag_roots: &[PathBuf]) -> Vec<PathBuf> {
    if !flag_roots.is_empty() {
        return flag_roots.to_vec();
    }
    if let Ok(env_roots) = std::env::var(ENV_ROOTS) {
        let roots: Vec<PathBuf> = env_roots
            .split(':')
            .filter(|part| !part.trim().is_empty())
            .map(PathBuf::from)
            .collect();
        if !roots.is_empty() {
            return roots;
        }
    }
    vec![PathBuf::from(".")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_fall_back_to_current_directory() {
        // Note: relies on GITFLEET_ROOTS being unset in the test env.
        if std::env::var(ENV_ROOTS).is_ok() {
            return;
        }
        assert_eq!(resolve_roots(&[]), vec![PathBuf::from(".")]);
    }

    #[test]
    fn flag_roots_take_precedence() {
        let roots = vec![PathBuf::from("/srv/fleet")];
        assert_eq!(resolve_roots(&roots), roots);
    }
}
