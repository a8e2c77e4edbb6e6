//! History purge: rewrite history to drop paths, then repair what
//! `filter-repo` tears down (remote, reflogs, upstreams).

use crate::report::{Event, EventCode};
use crate::shell_exec::CommandDetails;
use crate::workflow::registry::{bool_option, string_list_option, string_option};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let paths = string_list_option(options, "paths")?;
    if paths.is_empty() {
        return Err(WorkflowError::MissingOption { key: "paths".to_string() });
    }
    let remote = crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?
        .unwrap_or_else(|| env.remote());
    let push = bool_option(options, "push", false)?;
    let push_missing = bool_option(options, "push_missing", false)?;
    let restore_upstreams = bool_option(options, "restore_upstreams", true)?;

    let repo_name = state.name();
    let remote_configured = env.repos.remote_configured(&state.path, &remote)?;

    // Refresh remote refs so the rewrite sees the full picture.
    if remote_configured {
        let output = env.exec.run_git(
            CommandDetails::new(["fetch", remote.as_str()]).in_dir(state.path.as_path()),
        )?;
        if !output.success() {
            env.reporter.report(
                Event::warn(EventCode::FetchSkip, &repo_name, "fetch failed before purge")
                    .at_path(state.path.as_path())
                    .with_detail("reason", output.summary()),
            );
        }
    }

    ensure_gitignored(env, state, &paths)?;

    // Short-circuit when no commit touches any of the paths.
    let mut touched = Vec::new();
    for path in &paths {
        let stdout = env.repos.run(&state.path, &["rev-list", "--all", "--", path])?;
        if stdout.trim().is_empty() {
            env.reporter.report(
                Event::info(
                    EventCode::HistorySkip,
                    &repo_name,
                    format!("no matching history for {path}"),
                )
                .at_path(state.path.as_path())
                .with_detail("path", path),
            );
        } else {
            touched.push(path.clone());
        }
    }
    if touched.is_empty() {
        return Ok(());
    }

    // Remember the remote URL; filter-repo drops remotes by design of its
    // safety model.
    let original_url = if remote_configured {
        env.repos.get_remote_url(&state.path, &remote)?
    } else {
        None
    };

    // Primary rewrite. A failure here aborts the action.
    let mut filter_args: Vec<String> = vec!["filter-repo".to_string()];
    for path in &touched {
        filter_args.push("--path".to_string());
        filter_args.push(path.clone());
    }
    filter_args.extend(
        ["--invert-paths", "--prune-empty", "always", "--force"].map(str::to_string),
    );
    let filter_refs: Vec<&str> = filter_args.iter().map(String::as_str).collect();
    env.repos.run(&state.path, &filter_refs)?;

    // Drop filter-repo bookkeeping refs, then shed the rewritten objects.
    let refs = env
        .repos
        .run(&state.path, &["for-each-ref", "--format=%(refname)", "refs/filter-repo/"])?;
    for reference in refs.lines().map(str::trim).filter(|line| !line.is_empty()) {
        env.repos.run(&state.path, &["update-ref", "-d", reference])?;
    }
    env.repos.run(
        &state.path,
        &["reflog", "expire", "--expire=now", "--expire-unreachable=now", "--all"],
    )?;
    env.repos.run(&state.path, &["gc", "--prune=now", "--aggressive"])?;

    // Restore the remote if the rewrite removed it.
    if let Some(url) = &original_url
        && env.repos.get_remote_url(&state.path, &remote)?.is_none()
    {
        env.repos.add_remote(&state.path, &remote, url)?;
    }

    let mut pushed = false;
    if push && remote_configured {
        env.repos.run(&state.path, &["push", "--force", "--all", remote.as_str()])?;
        env.repos.run(&state.path, &["push", "--force", "--tags", remote.as_str()])?;
        pushed = true;
    }

    if restore_upstreams && remote_configured {
        for branch in env.repos.local_branches(&state.path)? {
            if env.repos.branch_upstream_remote(&state.path, &branch)?.is_some() {
                continue;
            }
            if env.repos.remote_branch_exists(&state.path, &remote, &branch)? {
                env.repos.set_upstream(&state.path, &branch, &remote)?;
            } else if push_missing {
                env.repos.run(
                    &state.path,
                    &["push", "--set-upstream", remote.as_str(), branch.as_str()],
                )?;
            } else {
                log::debug!("branch {branch} has no remote counterpart; upstream not restored");
            }
        }
    }

    env.reporter.report(
        Event::info(
            EventCode::HistoryPurge,
            &repo_name,
            format!("purged {} path(s) from history", touched.len()),
        )
        .at_path(state.path.as_path())
        .with_detail("paths", touched.join(","))
        .with_detail("pushed", pushed.to_string()),
    );

    Ok(())
}

/// Make sure `.gitignore` covers the purged paths so they cannot come back
/// in the next commit.
fn ensure_gitignored(
    env: &Environment<'_>,
    state: &RepositoryState,
    paths: &[String],
) -> Result<(), WorkflowError> {
    let gitignore = state.path.as_path().join(".gitignore");
    let existing = if env.fs.exists(&gitignore) {
        env.fs.read_to_string(&gitignore)?
    } else {
        String::new()
    };
    let present: std::collections::HashSet<&str> =
        existing.lines().map(str::trim).collect();
    let missing: Vec<&String> =
        paths.iter().filter(|path| !present.contains(path.as_str())).collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for path in &missing {
        updated.push_str(path);
        updated.push('\n');
    }
    env.fs.write(&gitignore, updated.as_bytes())?;
    env.repos.run(&state.path, &["add", "--", ".gitignore"])?;
    env.repos.run(&state.path, &["commit", "-m", "Ignore purged paths"])?;
    Ok(())
}
