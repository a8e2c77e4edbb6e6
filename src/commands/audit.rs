//! `gf audit` — CSV audit of the fleet.

use std::path::PathBuf;
use std::sync::Arc;

use gitfleet::audit::{CSV_HEADER, audit_repository};
use gitfleet::discovery::discover_repositories;
use gitfleet::github::GitHubResolver;
use gitfleet::repo::RepositoryManager;

use super::AppContext;

pub fn handle_audit(ctx: &AppContext, positional_roots: Vec<PathBuf>, all: bool) -> anyhow::Result<()> {
    let roots = if positional_roots.is_empty() { ctx.roots.clone() } else { positional_roots };

    let repositories = discover_repositories(ctx.exec.as_ref(), &roots)?;
    let manager = RepositoryManager::new(Arc::clone(&ctx.exec));
    let resolver = GitHubResolver::new(Arc::clone(&ctx.exec));
    let remote = ctx.options.remote_or_origin();

    ctx.reporter.print_data(CSV_HEADER);
    for path in repositories {
        let row = audit_repository(&manager, &resolver, &path, &remote);
        // Without --all, repositories that do not resolve on GitHub are
        // left out of the report.
        if !all && row.final_github_repo == "n/a" {
            continue;
        }
        ctx.reporter.print_data(&row.to_csv());
    }
    Ok(())
}
