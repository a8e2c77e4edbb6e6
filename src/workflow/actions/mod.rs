//! Built-in actions.
//!
//! Each handler is a pure consumer of `(environment, repository state,
//! options)`; composition into tasks happens in the planner, and every
//! handler is independently testable against a scripted executor.

mod cleanup;
mod default_branch;
mod message;
mod namespace;
mod purge;
mod switch;

use crate::domain::BranchName;
use crate::workflow::registry::{
    ActionRegistry, bool_option, map_option, required_string_option, string_list_option,
    string_option,
};
use crate::workflow::vars::{CaptureKind, CaptureSpec, CapturedValue};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

pub(crate) fn register_builtins(registry: &mut ActionRegistry) {
    registry.register("write-file", write_file);
    registry.register("stage", stage);
    registry.register("commit", commit);
    registry.register("push", push);
    registry.register("create-pr", create_pr);
    registry.register("capture", capture);
    registry.register("restore", restore);
    registry.register("switch-branch", switch::run);
    registry.register("rewrite-namespace", namespace::run);
    registry.register("purge-history", purge::run);
    registry.register("cleanup-branches", cleanup::run);
    registry.register("commit-message", message::run);
    registry.register("default-branch", default_branch::run);
}

fn write_file(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let path = required_string_option(options, "path")?;
    let contents = string_option(options, "contents")?.unwrap_or_default();
    let target = state.path.as_path().join(&path);
    env.fs.write(&target, contents.as_bytes())?;
    Ok(())
}

fn stage(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let paths = string_list_option(options, "paths")?;
    if paths.is_empty() {
        env.repos.run(&state.path, &["add", "-A"])?;
    } else {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        env.repos.run(&state.path, &args)?;
    }
    Ok(())
}

fn commit(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let message = required_string_option(options, "message")?;
    let allow_empty = bool_option(options, "allow_empty", false)?;

    // exit 0 = index matches HEAD, 1 = staged changes present
    let staged = !env.repos.run_ok(&state.path, &["diff", "--cached", "--quiet"])?;
    if !staged && !allow_empty {
        return Err(WorkflowError::NoChanges);
    }

    let mut args = vec!["commit", "-m", message.as_str()];
    if allow_empty {
        args.push("--allow-empty");
    }
    env.repos.run(&state.path, &args)?;
    Ok(())
}

fn push(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let remote = crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?
        .unwrap_or_else(|| env.remote());
    let branch = match string_option(options, "branch")? {
        Some(name) => BranchName::new(name).map_err(|e| WorkflowError::InvalidOption {
            key: "branch".to_string(),
            message: e.to_string(),
        })?,
        None => env
            .repos
            .current_branch(&state.path)?
            .ok_or_else(|| WorkflowError::InvalidOption {
                key: "branch".to_string(),
                message: "repository is in detached HEAD state and no branch was given".to_string(),
            })?,
    };
    let set_upstream = bool_option(options, "set_upstream", false)?;
    let force = bool_option(options, "force", false)?;

    let mut args = vec!["push"];
    if set_upstream {
        args.push("--set-upstream");
    }
    if force {
        args.push("--force");
    }
    args.push(remote.as_str());
    args.push(branch.as_str());
    env.repos.run(&state.path, &args)?;
    Ok(())
}

fn create_pr(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let title = required_string_option(options, "title")?;
    let body = string_option(options, "body")?.unwrap_or_default();
    let base = string_option(options, "base")?;
    let draft = bool_option(options, "draft", false)?;

    let mut args: Vec<String> = vec![
        "pr".to_string(),
        "create".to_string(),
        "--title".to_string(),
        title,
        "--body".to_string(),
        body,
    ];
    if let Some(base) = base {
        args.push("--base".to_string());
        args.push(base);
    }
    if draft {
        args.push("--draft".to_string());
    }
    env.exec.execute_gh(
        crate::shell_exec::CommandDetails::new(args)
            .in_dir(state.path.as_path())
            .require_token(),
    )?;
    Ok(())
}

/// Parse a capture block: `{ name, kind: branch|commit, overwrite }`.
pub(crate) fn capture_spec_from_options(options: &OptionMap) -> Result<CaptureSpec, WorkflowError> {
    let name = required_string_option(options, "name")?;
    let kind = match string_option(options, "kind")?.as_deref() {
        None | Some("branch") => CaptureKind::Branch,
        Some("commit") => CaptureKind::Commit,
        Some(other) => {
            return Err(WorkflowError::InvalidOption {
                key: "kind".to_string(),
                message: format!("expected \"branch\" or \"commit\", got {other:?}"),
            });
        }
    };
    let overwrite = bool_option(options, "overwrite", false)?;
    Ok(CaptureSpec { name, kind, overwrite })
}

/// Record the current branch or HEAD commit under a variable name.
pub(crate) fn capture_current(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    spec: &CaptureSpec,
) -> Result<(), WorkflowError> {
    let value = match spec.kind {
        CaptureKind::Branch => {
            let branch = env.repos.current_branch(&state.path)?.ok_or_else(|| {
                WorkflowError::InvalidOption {
                    key: "kind".to_string(),
                    message: "cannot capture a branch in detached HEAD state".to_string(),
                }
            })?;
            CapturedValue::Branch(branch)
        }
        CaptureKind::Commit => CapturedValue::Commit(env.repos.head_commit(&state.path)?),
    };
    state.vars.capture(spec, value);
    Ok(())
}

fn capture(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let spec = capture_spec_from_options(options)?;
    capture_current(env, state, &spec)
}

fn restore(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let name = required_string_option(options, "name")?;
    let expected = string_option(options, "kind")?;
    let value = state
        .vars
        .get(&name)
        .cloned()
        .ok_or_else(|| WorkflowError::UnknownVariable { name: name.clone() })?;

    if let Some(expected) = expected
        && expected != value.kind().to_string()
    {
        return Err(WorkflowError::UnsupportedRestoreKind {
            name,
            kind: value.kind().to_string(),
        });
    }

    match &value {
        CapturedValue::Branch(branch) => env.repos.checkout_branch(&state.path, branch)?,
        CapturedValue::Commit(sha) => env.repos.checkout_commit(&state.path, sha)?,
    }
    Ok(())
}

/// Nested `capture:` block on an action, if present.
pub(crate) fn optional_capture(options: &OptionMap) -> Result<Option<CaptureSpec>, WorkflowError> {
    map_option(options, "capture")?
        .map(capture_spec_from_options)
        .transpose()
}
