//! Typed Git operations on one repository, built on the shell façade.
//!
//! Every public operation validates its inputs before any process spawn;
//! invalid input surfaces as [`GitError::InvalidInput`].

use std::sync::Arc;

use crate::domain::{BranchName, RemoteName, RemoteUrl, RepositoryPath};
use crate::shell_exec::{CommandDetails, GitExecutor, ShellError};

#[derive(Debug)]
pub enum GitError {
    /// An input failed validation before any command ran.
    InvalidInput { field: &'static str, message: String },
    /// The underlying command failed.
    Shell(ShellError),
    /// Command output did not parse.
    Parse(String),
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::InvalidInput { field, message } => write!(f, "invalid {field}: {message}"),
            GitError::Shell(err) => write!(f, "{err}"),
            GitError::Parse(message) => write!(f, "unexpected git output: {message}"),
        }
    }
}

impl std::error::Error for GitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GitError::Shell(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShellError> for GitError {
    fn from(err: ShellError) -> Self {
        GitError::Shell(err)
    }
}

/// One `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Two-character XY code, e.g. ` M`, `??`, `!!`.
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    /// `??` untracked and `!!` ignored entries do not count as dirty.
    pub fn is_tracked_change(&self) -> bool {
        self.code != "??" && self.code != "!!"
    }
}

/// Parsed porcelain status for one worktree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    pub entries: Vec<StatusEntry>,
}

impl WorktreeStatus {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tracked(&self) -> Vec<&StatusEntry> {
        self.entries.iter().filter(|e| e.is_tracked_change()).collect()
    }

    pub fn untracked(&self) -> Vec<&StatusEntry> {
        self.entries.iter().filter(|e| !e.is_tracked_change()).collect()
    }
}

/// Typed Git operations atop a [`GitExecutor`].
#[derive(Clone)]
pub struct RepositoryManager {
    exec: Arc<dyn GitExecutor>,
}

impl RepositoryManager {
    pub fn new(exec: Arc<dyn GitExecutor>) -> Self {
        Self { exec }
    }

    pub fn executor(&self) -> &dyn GitExecutor {
        self.exec.as_ref()
    }

    /// Run a git command in the repository, treating non-zero exit as an error.
    pub fn run(&self, repo: &RepositoryPath, args: &[&str]) -> Result<String, GitError> {
        let output = self
            .exec
            .execute_git(CommandDetails::new(args.iter().copied()).in_dir(repo.as_path()))?;
        Ok(output.stdout)
    }

    /// Run a git command and report only whether it exited zero.
    pub fn run_ok(&self, repo: &RepositoryPath, args: &[&str]) -> Result<bool, GitError> {
        let output = self
            .exec
            .run_git(CommandDetails::new(args.iter().copied()).in_dir(repo.as_path()))?;
        Ok(output.success())
    }

    pub fn check_clean_worktree(&self, repo: &RepositoryPath) -> Result<bool, GitError> {
        Ok(self.worktree_status(repo)?.tracked().is_empty())
    }

    pub fn worktree_status(&self, repo: &RepositoryPath) -> Result<WorktreeStatus, GitError> {
        let stdout = self.run(repo, &["status", "--porcelain"])?;
        Ok(parse_porcelain_status(&stdout))
    }

    /// Current branch, or `None` in detached HEAD state.
    pub fn current_branch(&self, repo: &RepositoryPath) -> Result<Option<BranchName>, GitError> {
        let stdout = self.run(repo, &["branch", "--show-current"])?;
        let name = stdout.trim();
        if name.is_empty() {
            Ok(None)
        } else {
            BranchName::new(name)
                .map(Some)
                .map_err(|e| GitError::Parse(e.to_string()))
        }
    }

    pub fn checkout_branch(&self, repo: &RepositoryPath, branch: &BranchName) -> Result<(), GitError> {
        self.run(repo, &["switch", branch.as_str()])?;
        Ok(())
    }

    /// Checkout an arbitrary commit-ish (detaches HEAD for raw SHAs).
    pub fn checkout_commit(&self, repo: &RepositoryPath, commit: &str) -> Result<(), GitError> {
        let commit = commit.trim();
        if commit.is_empty() || commit.chars().any(char::is_whitespace) {
            return Err(GitError::InvalidInput {
                field: "commit",
                message: "commit-ish must be a single non-empty token".to_string(),
            });
        }
        self.run(repo, &["checkout", commit])?;
        Ok(())
    }

    pub fn create_branch(
        &self,
        repo: &RepositoryPath,
        branch: &BranchName,
        start: Option<&str>,
    ) -> Result<(), GitError> {
        match start {
            Some(start) if start.trim().is_empty() => Err(GitError::InvalidInput {
                field: "start point",
                message: "start point must not be empty".to_string(),
            }),
            Some(start) => {
                self.run(repo, &["branch", branch.as_str(), start])?;
                Ok(())
            }
            None => {
                self.run(repo, &["branch", branch.as_str()])?;
                Ok(())
            }
        }
    }

    pub fn delete_branch(
        &self,
        repo: &RepositoryPath,
        branch: &BranchName,
        force: bool,
    ) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(repo, &["branch", flag, branch.as_str()])?;
        Ok(())
    }

    /// Remote URL, or `None` when the remote is not configured.
    pub fn get_remote_url(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
    ) -> Result<Option<RemoteUrl>, GitError> {
        let key = format!("remote.{}.url", remote);
        let output = self.exec.run_git(
            CommandDetails::new(["config", "--get", key.as_str()]).in_dir(repo.as_path()),
        )?;
        if !output.success() {
            return Ok(None);
        }
        let url = output.stdout.trim();
        if url.is_empty() {
            return Ok(None);
        }
        RemoteUrl::new(url).map(Some).map_err(|e| GitError::Parse(e.to_string()))
    }

    pub fn set_remote_url(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
        url: &RemoteUrl,
    ) -> Result<(), GitError> {
        self.run(repo, &["remote", "set-url", remote.as_str(), url.as_str()])?;
        Ok(())
    }

    pub fn add_remote(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
        url: &RemoteUrl,
    ) -> Result<(), GitError> {
        self.run(repo, &["remote", "add", remote.as_str(), url.as_str()])?;
        Ok(())
    }

    pub fn list_remotes(&self, repo: &RepositoryPath) -> Result<Vec<RemoteName>, GitError> {
        let stdout = self.run(repo, &["remote"])?;
        parse_remote_list(&stdout)
    }

    pub fn remote_configured(&self, repo: &RepositoryPath, remote: &RemoteName) -> Result<bool, GitError> {
        Ok(self.get_remote_url(repo, remote)?.is_some())
    }

    /// Whether a local branch exists.
    pub fn branch_exists(&self, repo: &RepositoryPath, branch: &BranchName) -> Result<bool, GitError> {
        let target = format!("refs/heads/{}", branch);
        self.run_ok(repo, &["rev-parse", "--verify", "--quiet", &target])
    }

    /// Whether `refs/remotes/<remote>/<branch>` exists locally.
    pub fn remote_branch_exists(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
        branch: &BranchName,
    ) -> Result<bool, GitError> {
        let target = format!("refs/remotes/{}/{}", remote, branch);
        self.run_ok(repo, &["rev-parse", "--verify", "--quiet", &target])
    }

    pub fn head_commit(&self, repo: &RepositoryPath) -> Result<String, GitError> {
        let stdout = self.run(repo, &["rev-parse", "HEAD"])?;
        Ok(stdout.trim().to_string())
    }

    /// Remote's default branch via `ls-remote --symref <remote> HEAD`.
    pub fn remote_default_branch(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
    ) -> Result<Option<BranchName>, GitError> {
        let output = self.exec.run_git(
            CommandDetails::new(["ls-remote", "--symref", remote.as_str(), "HEAD"])
                .in_dir(repo.as_path()),
        )?;
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_symref_head(&output.stdout))
    }

    /// Remote of `branch.<name>.remote`, or `None` when no upstream is set.
    pub fn branch_upstream_remote(
        &self,
        repo: &RepositoryPath,
        branch: &BranchName,
    ) -> Result<Option<RemoteName>, GitError> {
        let key = format!("branch.{}.remote", branch);
        let output = self.exec.run_git(
            CommandDetails::new(["config", "--get", key.as_str()]).in_dir(repo.as_path()),
        )?;
        if !output.success() {
            return Ok(None);
        }
        let name = output.stdout.trim();
        if name.is_empty() {
            return Ok(None);
        }
        RemoteName::new(name).map(Some).map_err(|e| GitError::Parse(e.to_string()))
    }

    pub fn set_upstream(
        &self,
        repo: &RepositoryPath,
        branch: &BranchName,
        remote: &RemoteName,
    ) -> Result<(), GitError> {
        let target = format!("{}/{}", remote, branch);
        self.run(repo, &["branch", "--set-upstream-to", &target, branch.as_str()])?;
        Ok(())
    }

    pub fn stash_push(&self, repo: &RepositoryPath, message: &str) -> Result<(), GitError> {
        self.run(repo, &["stash", "push", "--message", message])?;
        Ok(())
    }

    pub fn stash_pop(&self, repo: &RepositoryPath) -> Result<(), GitError> {
        self.run(repo, &["stash", "pop"])?;
        Ok(())
    }

    /// Local branch names.
    pub fn local_branches(&self, repo: &RepositoryPath) -> Result<Vec<BranchName>, GitError> {
        let stdout = self.run(repo, &["branch", "--format=%(refname:short)"])?;
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| BranchName::new(line).map_err(|e| GitError::Parse(e.to_string())))
            .collect()
    }

    /// Branch heads on the remote via `ls-remote --heads`.
    pub fn remote_heads(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
    ) -> Result<Vec<BranchName>, GitError> {
        let stdout = self.run(repo, &["ls-remote", "--heads", remote.as_str()])?;
        parse_remote_heads(&stdout)
    }

    /// SHA of `refs/heads/<branch>` on the remote, if present.
    pub fn remote_head_sha(
        &self,
        repo: &RepositoryPath,
        remote: &RemoteName,
        branch: &BranchName,
    ) -> Result<Option<String>, GitError> {
        let target = format!("refs/heads/{}", branch);
        let stdout = self.run(repo, &["ls-remote", "--heads", remote.as_str(), &target])?;
        Ok(stdout
            .lines()
            .find_map(|line| line.split_once('\t').map(|(sha, _)| sha.trim().to_string()))
            .filter(|sha| !sha.is_empty()))
    }
}

/// Parse `git status --porcelain` output.
pub fn parse_porcelain_status(output: &str) -> WorktreeStatus {
    let entries = output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| StatusEntry {
            code: line[..2].to_string(),
            path: line[3..].to_string(),
        })
        .collect();
    WorktreeStatus { entries }
}

fn parse_remote_list(output: &str) -> Result<Vec<RemoteName>, GitError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| RemoteName::new(line).map_err(|e| GitError::Parse(e.to_string())))
        .collect()
}

/// Extract the default branch from `ls-remote --symref <remote> HEAD`.
fn parse_symref_head(output: &str) -> Option<BranchName> {
    output.lines().find_map(|line| {
        line.strip_prefix("ref: ")
            .and_then(|symref| symref.split_once('\t'))
            .map(|(ref_path, _)| ref_path)
            .and_then(|ref_path| ref_path.strip_prefix("refs/heads/"))
            .and_then(|branch| BranchName::new(branch).ok())
    })
}

fn parse_remote_heads(output: &str) -> Result<Vec<BranchName>, GitError> {
    output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .filter_map(|(_, refname)| refname.trim().strip_prefix("refs/heads/"))
        .map(|branch| BranchName::new(branch).map_err(|e| GitError::Parse(e.to_string())))
        .collect()
}
