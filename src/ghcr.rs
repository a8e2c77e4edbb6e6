//! GHCR package maintenance contract.
//!
//! The engine consumes only `purge_untagged(owner, package) -> counts`. The
//! default implementation drives the documented GitHub REST subset through
//! the curl façade:
//!
//! - `GET /{owner-type}/{owner}/packages/container/{pkg}/versions`
//! - `DELETE …/versions/{id}`

use std::sync::Arc;

use serde::Deserialize;

use crate::domain::OwnerSlug;
use crate::shell_exec::{
    CommandDetails, GitExecutor, ShellError, resolve_github_token,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OwnerType {
    Users,
    Orgs,
}

#[derive(Debug)]
pub enum GhcrError {
    MissingToken,
    Shell(ShellError),
    Parse(String),
}

impl std::fmt::Display for GhcrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GhcrError::MissingToken => {
                write!(f, "GHCR maintenance requires a GitHub token (GH_TOKEN or GITHUB_TOKEN)")
            }
            GhcrError::Shell(err) => write!(f, "{err}"),
            GhcrError::Parse(message) => write!(f, "unexpected GHCR response: {message}"),
        }
    }
}

impl std::error::Error for GhcrError {}

impl From<ShellError> for GhcrError {
    fn from(err: ShellError) -> Self {
        GhcrError::Shell(err)
    }
}

pub trait PackagePurger {
    /// Delete every untagged container version of `package`; in dry-run
    /// mode, only count them.
    fn purge_untagged(
        &self,
        owner: &OwnerSlug,
        package: &str,
        dry_run: bool,
        page_size: usize,
    ) -> Result<PurgeCounts, GhcrError>;
}

#[derive(Deserialize)]
struct PackageVersion {
    id: u64,
    metadata: Option<VersionMetadata>,
}

#[derive(Deserialize)]
struct VersionMetadata {
    container: Option<ContainerMetadata>,
}

#[derive(Deserialize)]
struct ContainerMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

impl PackageVersion {
    fn is_untagged(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.container.as_ref())
            .map(|c| c.tags.is_empty())
            .unwrap_or(true)
    }
}

/// REST client over the curl façade.
pub struct CurlGhcrClient {
    exec: Arc<dyn GitExecutor>,
    owner_type: OwnerType,
}

impl CurlGhcrClient {
    pub fn new(exec: Arc<dyn GitExecutor>, owner_type: OwnerType) -> Self {
        Self { exec, owner_type }
    }

    fn curl(&self, token: &str, method: &str, url: &str) -> Result<String, GhcrError> {
        let auth = format!("Authorization: Bearer {token}");
        let output = self.exec.execute_curl(CommandDetails::new([
            "--silent",
            "--show-error",
            "--fail-with-body",
            "-X",
            method,
            "-H",
            "Accept: application/vnd.github+json",
            "-H",
            auth.as_str(),
            url,
        ]))?;
        Ok(output.stdout)
    }
}

impl PackagePurger for CurlGhcrClient {
    fn purge_untagged(
        &self,
        owner: &OwnerSlug,
        package: &str,
        dry_run: bool,
        page_size: usize,
    ) -> Result<PurgeCounts, GhcrError> {
        let token = resolve_github_token().ok_or(GhcrError::MissingToken)?;
        let mut counts = PurgeCounts::default();
        let mut page = 1usize;

        loop {
            let url = format!(
                "https://api.github.com/{}/{}/packages/container/{}/versions?per_page={}&page={}",
                self.owner_type, owner, package, page_size, page
            );
            let body = self.curl(&token, "GET", &url)?;
            let versions: Vec<PackageVersion> =
                serde_json::from_str(&body).map_err(|e| GhcrError::Parse(e.to_string()))?;
            if versions.is_empty() {
                break;
            }

            for version in &versions {
                counts.scanned += 1;
                if !version.is_untagged() {
                    counts.kept += 1;
                    continue;
                }
                if dry_run {
                    counts.deleted += 1;
                    continue;
                }
                let delete_url = format!(
                    "https://api.github.com/{}/{}/packages/container/{}/versions/{}",
                    self.owner_type, owner, package, version.id
                );
                self.curl(&token, "DELETE", &delete_url)?;
                counts.deleted += 1;
            }

            if versions.len() < page_size {
                break;
            }
            page += 1;
        }

        Ok(counts)
    }
}
