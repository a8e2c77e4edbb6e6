//! Validated value types for the fleet domain.
//!
//! Every type here has a smart constructor that rejects malformed input at
//! the CLI/config boundary. Past that boundary the values are passed around
//! freely and never re-validated.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// `^[A-Za-z0-9][A-Za-z0-9._-]*$` — accepted grammar for owner slugs and
/// repository names.
static SLUG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("slug regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value was empty after trimming.
    Empty { field: &'static str },
    /// A repository path contained an embedded newline.
    PathInvalid { message: String },
    /// An owner slug or repository name failed the slug grammar.
    SlugInvalid { field: &'static str, value: String },
    /// A branch or remote name contained whitespace.
    NameInvalid { field: &'static str, value: String },
    /// A remote URL contained whitespace or did not parse.
    UrlInvalid { value: String, message: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::Empty { field } => write!(f, "{field} must not be empty"),
            DomainError::PathInvalid { message } => {
                write!(f, "invalid repository path: {message}")
            }
            DomainError::SlugInvalid { field, value } => {
                write!(f, "invalid {field} {value:?}: must match [A-Za-z0-9][A-Za-z0-9._-]*")
            }
            DomainError::NameInvalid { field, value } => {
                write!(f, "invalid {field} {value:?}: must not contain whitespace")
            }
            DomainError::UrlInvalid { value, message } => {
                write!(f, "invalid remote URL {value:?}: {message}")
            }
        }
    }
}

impl std::error::Error for DomainError {}

/// Absolute or relative path of one Git worktree.
///
/// Invariant: non-empty after trimming, no embedded newlines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryPath(PathBuf);

impl RepositoryPath {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let path = path.into();
        let text = path.to_string_lossy();
        if text.contains('\n') || text.contains('\r') {
            return Err(DomainError::PathInvalid {
                message: "path contains an embedded newline".to_string(),
            });
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "repository path" });
        }
        Ok(Self(PathBuf::from(trimmed)))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Last path component, used as the repository identifier in events and
    /// audit rows.
    pub fn folder_name(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.to_string_lossy().into_owned())
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// GitHub account (user or organization) slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerSlug(String);

impl OwnerSlug {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "owner slug" });
        }
        if !SLUG_RE.is_match(trimmed) {
            return Err(DomainError::SlugInvalid { field: "owner slug", value });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository name without the owner part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryName(String);

impl RepositoryName {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "repository name" });
        }
        if !SLUG_RE.is_match(trimmed) {
            return Err(DomainError::SlugInvalid { field: "repository name", value });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical `owner/name` pair as reported by GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRepository {
    pub owner: OwnerSlug,
    pub name: RepositoryName,
}

impl OwnerRepository {
    pub fn new(owner: OwnerSlug, name: RepositoryName) -> Self {
        Self { owner, name }
    }

    /// Parse an `owner/name` string.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let (owner, name) = value.split_once('/').ok_or_else(|| DomainError::SlugInvalid {
            field: "owner/repository",
            value: value.to_string(),
        })?;
        Ok(Self { owner: OwnerSlug::new(owner)?, name: RepositoryName::new(name)? })
    }
}

impl fmt::Display for OwnerRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Name of a configured Git remote, e.g. `origin`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteName(String);

impl RemoteName {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "remote name" });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::NameInvalid { field: "remote name", value });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn origin() -> Self {
        Self("origin".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local or remote branch name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "branch name" });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::NameInvalid { field: "branch name", value });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport protocol of a remote URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RemoteProtocol {
    Git,
    Ssh,
    Https,
    Other,
}

/// A remote URL as git reports it.
///
/// Invariant: non-empty, no whitespace. Classification and structural
/// parsing are separate: every URL classifies to a [`RemoteProtocol`], but
/// only the ssh (scp-like) and https shapes parse into [`RemoteUrlParts`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteUrl(String);

impl RemoteUrl {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Empty { field: "remote URL" });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(DomainError::UrlInvalid {
                value,
                message: "URL contains whitespace".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn protocol(&self) -> RemoteProtocol {
        let url = &self.0;
        if url.starts_with("https://") || url.starts_with("http://") {
            RemoteProtocol::Https
        } else if url.starts_with("ssh://") || url.starts_with("git@") {
            RemoteProtocol::Ssh
        } else if url.starts_with("git://") {
            RemoteProtocol::Git
        } else {
            RemoteProtocol::Other
        }
    }

    /// Structural parse for the accepted ssh/https grammar; `None` for
    /// everything else (including `ssh://` and `git://` forms).
    pub fn parse_parts(&self) -> Option<RemoteUrlParts> {
        parse_remote_url(&self.0)
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decomposed remote URL. `format` re-assembles the exact input string for
/// the accepted grammar, so `format(parse(u)) == u`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrlParts {
    pub protocol: RemoteProtocol,
    pub host: String,
    pub owner: OwnerSlug,
    pub repo: RepositoryName,
    /// Whether the original URL carried the `.git` suffix.
    pub dot_git: bool,
}

impl RemoteUrlParts {
    pub fn format(&self) -> String {
        let suffix = if self.dot_git { ".git" } else { "" };
        match self.protocol {
            RemoteProtocol::Https => {
                format!("https://{}/{}/{}{}", self.host, self.owner, self.repo, suffix)
            }
            _ => format!("git@{}:{}/{}{}", self.host, self.owner, self.repo, suffix),
        }
    }
}

/// Parse `https://host/owner/repo[.git]` or `git@host:owner/repo[.git]`.
pub fn parse_remote_url(url: &str) -> Option<RemoteUrlParts> {
    let (protocol, host, rest) = if let Some(stripped) = url.strip_prefix("https://") {
        let (host, rest) = stripped.split_once('/')?;
        (RemoteProtocol::Https, host, rest)
    } else if let Some(stripped) = url.strip_prefix("git@") {
        let (host, rest) = stripped.split_once(':')?;
        (RemoteProtocol::Ssh, host, rest)
    } else {
        return None;
    };

    if host.is_empty() {
        return None;
    }

    let (path, dot_git) = match rest.strip_suffix(".git") {
        Some(stripped) => (stripped, true),
        None => (rest, false),
    };
    let (owner, repo) = path.split_once('/')?;
    // Owner/repo must satisfy the slug grammar; reject deeper paths.
    if repo.contains('/') {
        return None;
    }
    Some(RemoteUrlParts {
        protocol,
        host: host.to_string(),
        owner: OwnerSlug::new(owner).ok()?,
        repo: RepositoryName::new(repo).ok()?,
        dot_git,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn repository_path_rejects_newline() {
        let result = RepositoryPath::new("/tmp/repo\nevil");
        assert!(matches!(result, Err(DomainError::PathInvalid { .. })));
    }

    #[test]
    fn repository_path_rejects_empty() {
        assert!(matches!(RepositoryPath::new("   "), Err(DomainError::Empty { .. })));
    }

    #[test]
    fn repository_path_folder_name() {
        let path = RepositoryPath::new("/tmp/fleet/example").unwrap();
        assert_eq!(path.folder_name(), "example");
    }

    #[rstest]
    #[case("owner")]
    #[case("Owner-1")]
    #[case("a.b_c-d")]
    #[case("0leading")]
    fn slug_accepts(#[case] value: &str) {
        assert!(OwnerSlug::new(value).is_ok());
        assert!(RepositoryName::new(value).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("-leading")]
    #[case(".leading")]
    #[case("has/slash")]
    #[case("has space")]
    fn slug_rejects(#[case] value: &str) {
        assert!(OwnerSlug::new(value).is_err());
        assert!(RepositoryName::new(value).is_err());
    }

    #[test]
    fn owner_repository_parse_and_display() {
        let parsed = OwnerRepository::parse("canonical/example").unwrap();
        assert_eq!(parsed.owner.as_str(), "canonical");
        assert_eq!(parsed.name.as_str(), "example");
        assert_eq!(parsed.to_string(), "canonical/example");
    }

    #[test]
    fn branch_rejects_whitespace() {
        assert!(BranchName::new("feat ure").is_err());
        assert!(BranchName::new("feature/ok").is_ok());
    }

    #[rstest]
    #[case("https://github.com/canonical/example.git", RemoteProtocol::Https)]
    #[case("git@github.com:canonical/example.git", RemoteProtocol::Ssh)]
    #[case("ssh://git@github.com/canonical/example.git", RemoteProtocol::Ssh)]
    #[case("git://github.com/canonical/example.git", RemoteProtocol::Git)]
    #[case("/srv/mirrors/example.git", RemoteProtocol::Other)]
    fn protocol_classification(#[case] url: &str, #[case] expected: RemoteProtocol) {
        assert_eq!(RemoteUrl::new(url).unwrap().protocol(), expected);
    }

    #[rstest]
    #[case("https://github.com/canonical/example.git")]
    #[case("https://github.com/canonical/example")]
    #[case("git@github.com:canonical/example.git")]
    #[case("git@github.com:canonical/example")]
    fn remote_url_round_trip(#[case] url: &str) {
        let parts = parse_remote_url(url).expect("URL should parse");
        assert_eq!(parts.format(), url);
    }

    #[test]
    fn remote_url_parse_rejects_deep_paths() {
        assert!(parse_remote_url("https://github.com/a/b/c").is_none());
        assert!(parse_remote_url("git@github.com:a").is_none());
    }
}
