//! Recursive discovery of Git worktrees under a set of roots.
//!
//! A directory is a repository when it directly contains a `.git` entry
//! (file or directory — worktrees and submodules use a file). The walk does
//! not descend into an identified repository, so only top-level worktrees of
//! each subtree are reported; nested repositories that their ancestor
//! gitignores are pruned afterwards through `git check-ignore`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::domain::RepositoryPath;
use crate::shell_exec::{CommandDetails, GitExecutor, ShellError};

#[derive(Debug)]
pub enum DiscoveryError {
    Io { path: PathBuf, source: std::io::Error },
    Shell(ShellError),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::Io { path, source } => {
                write!(f, "cannot walk {}: {source}", path.display())
            }
            DiscoveryError::Shell(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<ShellError> for DiscoveryError {
    fn from(err: ShellError) -> Self {
        DiscoveryError::Shell(err)
    }
}

/// Discover repositories beneath `roots`, absolute and deduplicated in
/// first-seen order.
pub fn discover_repositories(
    exec: &dyn GitExecutor,
    roots: &[PathBuf],
) -> Result<Vec<RepositoryPath>, DiscoveryError> {
    let mut seen = HashSet::new();
    let mut found: Vec<PathBuf> = Vec::new();

    for root in roots {
        let root = dunce::canonicalize(root)
            .map_err(|source| DiscoveryError::Io { path: root.clone(), source })?;
        let before = found.len();
        walk(&root, &mut seen, &mut found)?;
        log::debug!("discovered {} candidate repos under: {}", found.len() - before, root.display());
    }

    let pruned = prune_ignored(exec, found)?;
    Ok(pruned.into_iter().filter_map(|p| RepositoryPath::new(p).ok()).collect())
}

fn walk(
    dir: &Path,
    seen: &mut HashSet<PathBuf>,
    found: &mut Vec<PathBuf>,
) -> Result<(), DiscoveryError> {
    if dir.join(".git").exists() {
        if seen.insert(dir.to_path_buf()) {
            found.push(dir.to_path_buf());
        }
        return Ok(());
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|source| DiscoveryError::Io { path: dir.to_path_buf(), source })?;
    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io { path: dir.to_path_buf(), source })?;
        let path = entry.path();
        // Skip symlinks so cycles cannot recurse forever.
        let file_type = entry
            .file_type()
            .map_err(|source| DiscoveryError::Io { path: path.clone(), source })?;
        if file_type.is_dir() && !file_type.is_symlink() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    for subdir in subdirs {
        walk(&subdir, seen, found)?;
    }
    Ok(())
}

/// Drop every repository that lies under another discovered repository and
/// is gitignored by it.
///
/// `check-ignore` exits 1 when nothing matched; that is "not ignored", not
/// an error. Other failures propagate.
fn prune_ignored(
    exec: &dyn GitExecutor,
    found: Vec<PathBuf>,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut ignored: HashSet<PathBuf> = HashSet::new();

    for ancestor in &found {
        let descendants: Vec<(&PathBuf, String)> = found
            .iter()
            .filter(|candidate| *candidate != ancestor)
            .filter_map(|candidate| {
                candidate
                    .strip_prefix(ancestor)
                    .ok()
                    .map(|rel| (candidate, rel.to_string_lossy().into_owned()))
            })
            .collect();
        if descendants.is_empty() {
            continue;
        }

        let stdin = descendants
            .iter()
            .map(|(_, rel)| rel.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let output = exec.run_git(
            CommandDetails::new(["check-ignore", "--stdin"])
                .in_dir(ancestor)
                .with_stdin(stdin.into_bytes()),
        )?;
        if output.status != 0 && output.status != 1 {
            return Err(DiscoveryError::Shell(ShellError::CommandFailed {
                command: "git check-ignore --stdin".to_string(),
                output,
            }));
        }

        let matched: HashSet<&str> = output.stdout.lines().map(str::trim).collect();
        for (candidate, rel) in &descendants {
            if matched.contains(rel.as_str()) {
                ignored.insert((*candidate).clone());
            }
        }
    }

    Ok(found.into_iter().filter(|path| !ignored.contains(path)).collect())
}
