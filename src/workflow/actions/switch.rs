//! Branch switch: remote enumeration, fetch, switch (create if missing),
//! pull/refresh, tracking repair, capture, stash restoration.

use crate::domain::{BranchName, RemoteName};
use crate::report::{Event, EventCode};
use crate::shell_exec::CommandDetails;
use crate::workflow::registry::{bool_option, string_option};
use crate::workflow::vars::CaptureSpec;
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

use super::{capture_current, optional_capture};

/// Where the target branch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchSource {
    Explicit,
    RemoteDefault,
    ConfiguredDefault,
}

impl BranchSource {
    fn label(self) -> &'static str {
        match self {
            BranchSource::Explicit => "explicit",
            BranchSource::RemoteDefault => "remote_default",
            BranchSource::ConfiguredDefault => "configured_default",
        }
    }
}

struct SwitchParams {
    branch: Option<BranchName>,
    configured_default: Option<BranchName>,
    remote: RemoteName,
    remote_overridden: bool,
    create_if_missing: bool,
    refresh: bool,
    require_clean: bool,
    stash: bool,
    commit: bool,
    capture: Option<CaptureSpec>,
}

impl SwitchParams {
    fn parse(env: &Environment<'_>, options: &OptionMap) -> Result<Self, WorkflowError> {
        let branch = string_option(options, "branch")?
            .map(|name| {
                BranchName::new(name).map_err(|e| WorkflowError::InvalidOption {
                    key: "branch".to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        let configured_default = string_option(options, "default")?
            .map(|name| {
                BranchName::new(name).map_err(|e| WorkflowError::InvalidOption {
                    key: "default".to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;

        let remote_option =
            crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?;
        let remote_overridden = remote_option.is_some() || env.options.remote.is_some();
        let remote = remote_option.unwrap_or_else(|| env.remote());

        let stash = bool_option(options, "stash", false)?;
        let commit = bool_option(options, "commit", false)?;
        if stash && commit {
            return Err(WorkflowError::Configuration {
                message: "stash and commit are mutually exclusive".to_string(),
            });
        }
        // Either dirty strategy implies a refresh.
        let refresh = bool_option(options, "refresh", true)? || stash || commit;

        Ok(Self {
            branch,
            configured_default,
            remote,
            remote_overridden,
            create_if_missing: bool_option(options, "create_if_missing", true)?,
            refresh,
            require_clean: bool_option(options, "require_clean", false)?,
            stash,
            commit,
            capture: optional_capture(options)?,
        })
    }
}

fn is_repo_not_found(stderr: &str) -> bool {
    stderr.contains("Repository not found")
        || stderr.contains("Could not read from remote repository")
}

fn is_missing_ref(stderr: &str) -> bool {
    stderr.contains("invalid reference") || stderr.contains("unknown branch")
}

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let params = SwitchParams::parse(env, options)?;
    let repo_name = state.name();

    // Branch resolution, first match wins.
    let (branch, source) = if let Some(branch) = params.branch.clone() {
        (branch, BranchSource::Explicit)
    } else if let Some(branch) = state.inspection.remote_default_branch.clone() {
        (branch, BranchSource::RemoteDefault)
    } else if let Some(branch) = params.configured_default.clone() {
        (branch, BranchSource::ConfiguredDefault)
    } else {
        return Err(WorkflowError::BranchUnresolvable);
    };

    // Status and dirty handling.
    let status = env.repos.worktree_status(&state.path)?;
    let has_tracked = !status.tracked().is_empty();
    let has_untracked = !status.untracked().is_empty();

    let mut refresh_allowed = params.refresh;
    let mut refresh_label = params.refresh.to_string();
    let mut stashed = false;
    let mut committed = false;

    if has_tracked {
        if params.stash {
            env.repos.stash_push(&state.path, "gitfleet: switch")?;
            stashed = true;
        } else if params.commit {
            env.repos.run(&state.path, &["add", "-A"])?;
            let message = format!("Save work in progress before switching to {branch}");
            env.repos.run(&state.path, &["commit", "-m", &message])?;
            committed = true;
        } else if params.require_clean {
            // Do not abort; switch without refreshing.
            refresh_allowed = false;
            refresh_label = "skipped_dirty".to_string();
        }
    }
    if has_untracked && refresh_allowed {
        env.reporter.report(
            Event::warn(
                EventCode::RepoDirty,
                &repo_name,
                "untracked files present; refreshing anyway",
            )
            .at_path(state.path.as_path())
            .with_detail("untracked", status.untracked().len().to_string()),
        );
    }

    let flow = switch_flow(env, state, &params, &branch, &repo_name, refresh_allowed);

    // Stash restoration runs on every exit path, exactly once per push.
    if stashed {
        if let Err(pop_err) = env.repos.stash_pop(&state.path) {
            let pop_err = WorkflowError::from(pop_err);
            return Err(match flow {
                Ok(_) => pop_err,
                Err(err) => err.compose(pop_err),
            });
        }
    }
    let flow = flow?;

    if let Some(spec) = &params.capture {
        capture_current(env, state, spec)?;
    }

    let mut event = Event::info(
        EventCode::RepoSwitched,
        &repo_name,
        format!("switched to {branch}"),
    )
    .at_path(state.path.as_path())
    .with_detail("branch", branch.as_str())
    .with_detail("source", source.label())
    .with_detail("created", flow.created.to_string())
    .with_detail("refresh", if flow.refreshed { "true".to_string() } else { refresh_label })
    .with_detail("require_clean", params.require_clean.to_string());
    if stashed {
        event = event.with_detail("stash", "true");
    }
    if committed {
        event = event.with_detail("commit", "true");
    }
    env.reporter.report(event);

    Ok(())
}

struct FlowOutcome {
    created: bool,
    refreshed: bool,
}

fn switch_flow(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    params: &SwitchParams,
    branch: &BranchName,
    repo_name: &str,
    mut refresh_allowed: bool,
) -> Result<FlowOutcome, WorkflowError> {
    // Remote enumeration.
    let remotes = env.repos.list_remotes(&state.path)?;
    let has_remotes = !remotes.is_empty();
    let requested_exists = remotes.contains(&params.remote);

    // Fetch. An explicitly requested remote that is not configured skips
    // the network steps with a warning instead of failing the action.
    if params.remote_overridden && !requested_exists {
        env.reporter.report(
            Event::warn(
                EventCode::RemoteMissing,
                repo_name,
                format!("remote {} is not configured", params.remote),
            )
            .at_path(state.path.as_path())
            .with_detail("remote", params.remote.as_str()),
        );
        refresh_allowed = false;
    } else if has_remotes {
        let args: Vec<&str> = if requested_exists {
            vec!["fetch", "--prune", params.remote.as_str()]
        } else {
            vec!["fetch", "--prune", "--all"]
        };
        let output = env
            .exec
            .run_git(CommandDetails::new(args).in_dir(state.path.as_path()))?;
        if !output.success() {
            let message = if is_repo_not_found(&output.stderr) {
                format!("no remote counterpart for {repo_name} repo")
            } else {
                "fetch failed; skipping refresh".to_string()
            };
            env.reporter.report(
                Event::warn(EventCode::FetchSkip, repo_name, message)
                    .at_path(state.path.as_path())
                    .with_detail("remote", params.remote.as_str())
                    .with_detail("reason", output.summary()),
            );
            refresh_allowed = false;
        }
    }

    // Switch, creating the branch when the ref is missing.
    let mut created = false;
    let switch_output = env.exec.run_git(
        CommandDetails::new(["switch", branch.as_str()]).in_dir(state.path.as_path()),
    )?;
    if !switch_output.success() {
        if params.create_if_missing && is_missing_ref(&switch_output.stderr) {
            let track_remote = requested_exists
                && env.repos.remote_branch_exists(&state.path, &params.remote, branch)?;
            if track_remote {
                let upstream = format!("{}/{}", params.remote, branch);
                env.repos.run(
                    &state.path,
                    &["switch", "-c", branch.as_str(), "--track", &upstream],
                )?;
            } else {
                env.repos.run(&state.path, &["switch", "-c", branch.as_str()])?;
            }
            created = true;
        } else {
            return Err(WorkflowError::Shell(crate::shell_exec::ShellError::CommandFailed {
                command: format!("git switch {branch}"),
                output: switch_output,
            }));
        }
    }

    // Pull, with tracking repair when the branch has no upstream.
    let mut refreshed = false;
    if refresh_allowed {
        let has_tracking = match env.repos.branch_upstream_remote(&state.path, branch)? {
            Some(_) => true,
            None => {
                if requested_exists
                    && env.repos.remote_branch_exists(&state.path, &params.remote, branch)?
                {
                    env.repos.set_upstream(&state.path, branch, &params.remote)?;
                    true
                } else {
                    env.reporter.report(
                        Event::warn(
                            EventCode::PullSkip,
                            repo_name,
                            format!("no upstream for {branch}; refresh not applicable"),
                        )
                        .at_path(state.path.as_path())
                        .with_detail("branch", branch.as_str()),
                    );
                    false
                }
            }
        };
        if has_tracking {
            let output = env.exec.run_git(
                CommandDetails::new(["pull", "--rebase"]).in_dir(state.path.as_path()),
            )?;
            if output.success() {
                refreshed = true;
            } else {
                env.reporter.report(
                    Event::warn(EventCode::PullSkip, repo_name, "pull failed; worktree left as-is")
                        .at_path(state.path.as_path())
                        .with_detail("reason", output.summary()),
                );
            }
        }
    }

    Ok(FlowOutcome { created, refreshed })
}
