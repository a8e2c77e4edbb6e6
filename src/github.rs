//! Canonical GitHub metadata via the `gh` CLI.

use std::sync::Arc;

use serde::Deserialize;

use crate::domain::{BranchName, OwnerRepository, RepositoryPath};
use crate::shell_exec::{CommandDetails, CommandKind, GitExecutor, ShellError};

/// Canonical identity of one repository as GitHub reports it, after any
/// renames or transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadata {
    pub canonical: OwnerRepository,
    pub default_branch: Option<BranchName>,
}

#[derive(Deserialize)]
struct RepoViewPayload {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<DefaultBranchRef>,
}

#[derive(Deserialize)]
struct DefaultBranchRef {
    name: String,
}

/// Resolves `owner/repo` + default branch through `gh repo view`.
#[derive(Clone)]
pub struct GitHubResolver {
    exec: Arc<dyn GitExecutor>,
}

impl GitHubResolver {
    pub fn new(exec: Arc<dyn GitExecutor>) -> Self {
        Self { exec }
    }

    /// Resolve metadata for the repository at `path`. A repository that `gh`
    /// cannot resolve (no remote, not on GitHub, no auth) yields `Ok(None)`;
    /// only a missing `gh` binary is an error.
    pub fn resolve(&self, path: &RepositoryPath) -> Result<Option<RepoMetadata>, ShellError> {
        let output = self.exec.run(
            CommandKind::Gh,
            CommandDetails::new(["repo", "view", "--json", "nameWithOwner,defaultBranchRef"])
                .in_dir(path.as_path()),
        );
        let output = match output {
            Ok(output) => output,
            Err(ShellError::MissingToken { .. }) => return Ok(None),
            Err(err @ ShellError::ExecutionFailed { .. }) => return Err(err),
            Err(ShellError::CommandFailed { .. }) => return Ok(None),
        };
        if !output.success() {
            log::debug!("gh repo view failed for {path}: {}", output.summary());
            return Ok(None);
        }
        Ok(parse_repo_view(&output.stdout))
    }
}

fn parse_repo_view(payload: &str) -> Option<RepoMetadata> {
    let parsed: RepoViewPayload = serde_json::from_str(payload).ok()?;
    let canonical = OwnerRepository::parse(&parsed.name_with_owner).ok()?;
    let default_branch = parsed
        .default_branch_ref
        .and_then(|r| BranchName::new(r.name).ok());
    Some(RepoMetadata { canonical, default_branch })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repo_view_payload() {
        let payload = r#"{"nameWithOwner":"canonical/example","defaultBranchRef":{"name":"main"}}"#;
        let metadata = parse_repo_view(payload).unwrap();
        assert_eq!(metadata.canonical.to_string(), "canonical/example");
        assert_eq!(metadata.default_branch.unwrap().as_str(), "main");
    }

    #[test]
    fn missing_default_branch_is_none() {
        let payload = r#"{"nameWithOwner":"canonical/example","defaultBranchRef":null}"#;
        let metadata = parse_repo_view(payload).unwrap();
        assert!(metadata.default_branch.is_none());
    }

    #[test]
    fn malformed_payload_is_none() {
        assert!(parse_repo_view("not json").is_none());
        assert!(parse_repo_view(r#"{"nameWithOwner":"no-slash"}"#).is_none());
    }
}
