//! Repository audit: one CSV row per discovered repository.
//!
//! Every column degrades to `n/a` when the underlying lookup does not
//! apply (no remote, no GitHub metadata, no upstream), so a fleet audit
//! never aborts halfway through.

use crate::domain::{RemoteName, RepositoryPath};
use crate::github::GitHubResolver;
use crate::repo::RepositoryManager;
use crate::shell_exec::CommandDetails;

pub const CSV_HEADER: &str = "folder_name,final_github_repo,name_matches,remote_default_branch,local_branch,in_sync,remote_protocol,origin_matches_canonical";

const NOT_APPLICABLE: &str = "n/a";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub folder_name: String,
    pub final_github_repo: String,
    pub name_matches: String,
    pub remote_default_branch: String,
    pub local_branch: String,
    pub in_sync: String,
    pub remote_protocol: String,
    pub origin_matches_canonical: String,
}

impl AuditRow {
    pub fn to_csv(&self) -> String {
        [
            self.folder_name.as_str(),
            self.final_github_repo.as_str(),
            self.name_matches.as_str(),
            self.remote_default_branch.as_str(),
            self.local_branch.as_str(),
            self.in_sync.as_str(),
            self.remote_protocol.as_str(),
            self.origin_matches_canonical.as_str(),
        ]
        .join(",")
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Inspect one repository and produce its audit row.
pub fn audit_repository(
    manager: &RepositoryManager,
    resolver: &GitHubResolver,
    path: &RepositoryPath,
    remote: &RemoteName,
) -> AuditRow {
    let folder_name = path.folder_name();

    let metadata = resolver.resolve(path).ok().flatten();
    let final_github_repo = metadata
        .as_ref()
        .map(|m| m.canonical.to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());
    let name_matches = metadata
        .as_ref()
        .map(|m| yes_no(m.canonical.name.as_str() == folder_name))
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let local_branch = manager
        .current_branch(path)
        .ok()
        .flatten()
        .map(|b| b.as_str().to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let remote_url = manager.get_remote_url(path, remote).ok().flatten();
    let remote_protocol = remote_url
        .as_ref()
        .map(|url| url.protocol().to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let remote_default_branch = metadata
        .as_ref()
        .and_then(|m| m.default_branch.as_ref().map(|b| b.as_str().to_string()))
        .or_else(|| {
            remote_url.as_ref().and_then(|_| {
                manager
                    .remote_default_branch(path, remote)
                    .ok()
                    .flatten()
                    .map(|b| b.as_str().to_string())
            })
        })
        .unwrap_or_else(|| NOT_APPLICABLE.to_string());

    let origin_matches_canonical = match (metadata.as_ref(), remote_url.as_ref()) {
        (Some(metadata), Some(url)) => url
            .parse_parts()
            .map(|parts| {
                yes_no(
                    parts.owner == metadata.canonical.owner
                        && parts.repo == metadata.canonical.name,
                )
            })
            .unwrap_or_else(|| NOT_APPLICABLE.to_string()),
        _ => NOT_APPLICABLE.to_string(),
    };

    let in_sync = in_sync_column(manager, path, &local_branch);

    AuditRow {
        folder_name,
        final_github_repo,
        name_matches,
        remote_default_branch,
        local_branch,
        in_sync,
        remote_protocol,
        origin_matches_canonical,
    }
}

/// `yes`/`no` from ahead/behind against the upstream; `n/a` without one.
fn in_sync_column(manager: &RepositoryManager, path: &RepositoryPath, local_branch: &str) -> String {
    if local_branch == NOT_APPLICABLE {
        return NOT_APPLICABLE.to_string();
    }
    let upstream_ref = format!("{local_branch}@{{u}}");
    let upstream = manager.executor().run_git(
        CommandDetails::new(["rev-parse", "--abbrev-ref", upstream_ref.as_str()])
            .in_dir(path.as_path()),
    );
    let upstream = match upstream {
        Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
            output.stdout.trim().to_string()
        }
        _ => return NOT_APPLICABLE.to_string(),
    };

    let range = format!("{local_branch}...{upstream}");
    let counts = manager.executor().run_git(
        CommandDetails::new(["rev-list", "--left-right", "--count", range.as_str()])
            .in_dir(path.as_path()),
    );
    match counts {
        Ok(output) if output.success() => {
            let trimmed = output.stdout.trim();
            let mut parts = trimmed.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(ahead), Some(behind)) => yes_no(ahead == "0" && behind == "0"),
                _ => NOT_APPLICABLE.to_string(),
            }
        }
        _ => NOT_APPLICABLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell_exec::GitExecutor;
    use crate::testing::{ScriptedExecutor, failed_output, ok_output};
    use std::sync::Arc;

    fn managers(exec: ScriptedExecutor) -> (Arc<ScriptedExecutor>, RepositoryManager, GitHubResolver) {
        let exec = Arc::new(exec);
        let dyn_exec: Arc<dyn GitExecutor> = exec.clone();
        (exec, RepositoryManager::new(dyn_exec.clone()), GitHubResolver::new(dyn_exec))
    }

    #[test]
    fn full_depth_audit_row() {
        // Scenario: branch main, origin under a non-canonical owner,
        // metadata canonical/example with default main, no upstream.
        let exec = ScriptedExecutor::new(vec![
            (
                "repo view --json",
                ok_output(r#"{"nameWithOwner":"canonical/example","defaultBranchRef":{"name":"main"}}"#),
            ),
            ("branch --show-current", ok_output("main\n")),
            (
                "config --get remote.origin.url",
                ok_output("https://github.com/origin/example.git\n"),
            ),
            ("rev-parse --abbrev-ref main@{u}", failed_output(128, "fatal: no upstream\n")),
        ]);
        let (_exec, manager, resolver) = managers(exec);
        let path = RepositoryPath::new("/tmp/example").unwrap();

        let row = audit_repository(&manager, &resolver, &path, &RemoteName::origin());
        assert_eq!(row.to_csv(), "example,canonical/example,yes,main,main,n/a,https,no");
    }

    #[test]
    fn unresolvable_repository_degrades_to_not_applicable() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", failed_output(1, "gh: Could not resolve\n")),
            ("branch --show-current", ok_output("work\n")),
            ("config --get remote.origin.url", failed_output(1, "")),
            ("rev-parse --abbrev-ref work@{u}", failed_output(128, "")),
        ]);
        let (_exec, manager, resolver) = managers(exec);
        let path = RepositoryPath::new("/tmp/orphan").unwrap();

        let row = audit_repository(&manager, &resolver, &path, &RemoteName::origin());
        assert_eq!(row.to_csv(), "orphan,n/a,n/a,n/a,work,n/a,n/a,n/a");
    }

    #[test]
    fn in_sync_reflects_ahead_behind_counts() {
        let exec = ScriptedExecutor::new(vec![
            (
                "repo view --json",
                ok_output(r#"{"nameWithOwner":"canonical/example","defaultBranchRef":{"name":"main"}}"#),
            ),
            ("branch --show-current", ok_output("main\n")),
            (
                "config --get remote.origin.url",
                ok_output("git@github.com:canonical/example.git\n"),
            ),
            ("rev-parse --abbrev-ref main@{u}", ok_output("origin/main\n")),
            ("rev-list --left-right --count main...origin/main", ok_output("0\t0\n")),
        ]);
        let (_exec, manager, resolver) = managers(exec);
        let path = RepositoryPath::new("/tmp/example").unwrap();

        let row = audit_repository(&manager, &resolver, &path, &RemoteName::origin());
        assert_eq!(row.in_sync, "yes");
        assert_eq!(row.origin_matches_canonical, "yes");
        assert_eq!(row.remote_protocol, "ssh");
    }

    #[test]
    fn csv_header_matches_row_arity() {
        let columns = CSV_HEADER.split(',').count();
        let row = AuditRow {
            folder_name: "a".into(),
            final_github_repo: "b".into(),
            name_matches: "c".into(),
            remote_default_branch: "d".into(),
            local_branch: "e".into(),
            in_sync: "f".into(),
            remote_protocol: "g".into(),
            origin_matches_canonical: "h".into(),
        };
        assert_eq!(row.to_csv().split(',').count(), columns);
    }
}
