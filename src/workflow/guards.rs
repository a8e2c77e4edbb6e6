//! Guards: predicates evaluated just before an action runs.
//!
//! A failing guard skips the current task for the repository (WARN
//! `TASK_SKIP`); the repository's later tasks still run.

use std::path::PathBuf;

use crate::domain::{BranchName, RemoteName};
use crate::report::EventCode;

use super::{Environment, RepositoryState, WorkflowError};

#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    CleanWorktree { ignore: Vec<String> },
    BranchAbsent { branch: BranchName },
    BranchPresent { branch: BranchName },
    RemoteConfigured { remote: RemoteName },
    PathsExist { paths: Vec<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub pass: bool,
    pub reason: String,
    pub code: EventCode,
}

impl GuardOutcome {
    fn pass() -> Self {
        Self { pass: true, reason: String::new(), code: EventCode::TaskSkip }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self { pass: false, reason: reason.into(), code: EventCode::TaskSkip }
    }
}

impl Guard {
    pub fn evaluate(
        &self,
        env: &Environment<'_>,
        state: &RepositoryState,
    ) -> Result<GuardOutcome, WorkflowError> {
        match self {
            Guard::CleanWorktree { ignore } => {
                let status = env.repos.worktree_status(&state.path)?;
                let blocking: Vec<&str> = status
                    .tracked()
                    .into_iter()
                    .filter(|entry| !matches_any(&entry.path, ignore))
                    .map(|entry| entry.path.as_str())
                    .collect();
                if blocking.is_empty() {
                    Ok(GuardOutcome::pass())
                } else {
                    Ok(GuardOutcome::fail(format!(
                        "worktree not clean ({} tracked change{})",
                        blocking.len(),
                        if blocking.len() == 1 { "" } else { "s" }
                    )))
                }
            }
            Guard::BranchAbsent { branch } => {
                if env.repos.branch_exists(&state.path, branch)? {
                    Ok(GuardOutcome::fail(format!("branch {branch} already exists")))
                } else {
                    Ok(GuardOutcome::pass())
                }
            }
            Guard::BranchPresent { branch } => {
                if env.repos.branch_exists(&state.path, branch)? {
                    Ok(GuardOutcome::pass())
                } else {
                    Ok(GuardOutcome::fail(format!("branch {branch} does not exist")))
                }
            }
            Guard::RemoteConfigured { remote } => {
                if env.repos.remote_configured(&state.path, remote)? {
                    Ok(GuardOutcome::pass())
                } else {
                    Ok(GuardOutcome::fail(format!("remote {remote} is not configured")))
                }
            }
            Guard::PathsExist { paths } => {
                let missing: Vec<String> = paths
                    .iter()
                    .filter(|path| !env.fs.exists(&state.path.as_path().join(path)))
                    .map(|path| path.display().to_string())
                    .collect();
                if missing.is_empty() {
                    Ok(GuardOutcome::pass())
                } else {
                    Ok(GuardOutcome::fail(format!("missing paths: {}", missing.join(", "))))
                }
            }
        }
    }

    /// Short label for skip-event details.
    pub fn label(&self) -> &'static str {
        match self {
            Guard::CleanWorktree { .. } => "clean_worktree",
            Guard::BranchAbsent { .. } => "branch_absent",
            Guard::BranchPresent { .. } => "branch_present",
            Guard::RemoteConfigured { .. } => "remote_configured",
            Guard::PathsExist { .. } => "paths_exist",
        }
    }
}

/// Ignore-pattern match: exact path, directory prefix, or a trailing-`*`
/// glob.
fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == pattern || path.starts_with(&format!("{pattern}/"))
        }
    })
}
