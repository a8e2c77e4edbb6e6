//! `gf repo packages purge` — GHCR untagged-version cleanup.

use std::sync::Arc;

use anyhow::Context;

use gitfleet::ghcr::{CurlGhcrClient, OwnerType, PackagePurger};
use gitfleet::github::GitHubResolver;

use super::AppContext;

pub fn handle_packages_purge(
    ctx: &AppContext,
    package: Option<String>,
    dry_run: bool,
    page_size: usize,
    org: bool,
) -> anyhow::Result<()> {
    if page_size == 0 {
        anyhow::bail!("page size must be positive");
    }
    let path = ctx.current_repository()?;
    let resolver = GitHubResolver::new(Arc::clone(&ctx.exec));
    let metadata = resolver
        .resolve(&path)?
        .context("cannot resolve GitHub metadata for the current repository")?;
    let package = package.unwrap_or_else(|| metadata.canonical.name.as_str().to_string());

    let owner_type = if org { OwnerType::Orgs } else { OwnerType::Users };
    let client = CurlGhcrClient::new(Arc::clone(&ctx.exec), owner_type);
    let counts = client.purge_untagged(&metadata.canonical.owner, &package, dry_run, page_size)?;

    let suffix = if dry_run { " (dry run)" } else { "" };
    ctx.reporter.print_data(&format!(
        "Purge: package={package} scanned={} deleted={} kept={}{suffix}",
        counts.scanned, counts.deleted, counts.kept
    ));
    Ok(())
}
