//! Namespace rewrite: move `go.mod` and source imports from an old module
//! prefix to a new one, on a fresh timestamped branch.

use std::path::PathBuf;

use chrono::Utc;
use ignore::WalkBuilder;

use crate::domain::BranchName;
use crate::report::{Event, EventCode};
use crate::shell_exec::CommandDetails;
use crate::workflow::registry::{bool_option, required_string_option, string_option};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let old_prefix = required_string_option(options, "old_prefix")?;
    let new_prefix = required_string_option(options, "new_prefix")?;
    let branch_prefix =
        string_option(options, "branch_prefix")?.unwrap_or_else(|| "namespace-rewrite".to_string());
    let message = string_option(options, "message")?
        .unwrap_or_else(|| format!("Rewrite module namespace from {old_prefix} to {new_prefix}"));
    let push = bool_option(options, "push", true)?;
    let dry_run = bool_option(options, "dry_run", false)?;
    let remote = crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?
        .unwrap_or_else(|| env.remote());

    let repo_name = state.name();
    let candidates = collect_candidates(state)?;
    let candidates = drop_ignored(env, state, candidates)?;

    // Compute rewrites before touching anything.
    let mut changes: Vec<(PathBuf, String)> = Vec::new();
    for rel in &candidates {
        let absolute = state.path.as_path().join(rel);
        let contents = env.fs.read_to_string(&absolute)?;
        let rewritten = if rel.file_name().is_some_and(|name| name == "go.mod") {
            rewrite_go_mod(&contents, &old_prefix, &new_prefix)
        } else {
            rewrite_imports(&contents, &old_prefix, &new_prefix)
        };
        if let Some(rewritten) = rewritten {
            changes.push((rel.clone(), rewritten));
        }
    }

    if changes.is_empty() {
        env.reporter.report(
            Event::info(
                EventCode::NamespaceSkip,
                &repo_name,
                format!("no imports under {old_prefix}; nothing to rewrite"),
            )
            .at_path(state.path.as_path())
            .with_detail("old_prefix", &old_prefix)
            .with_detail("new_prefix", &new_prefix),
        );
        return Ok(());
    }

    if dry_run {
        env.reporter.report(
            Event::info(
                EventCode::NamespaceRewrite,
                &repo_name,
                format!("dry run: {} file(s) would change", changes.len()),
            )
            .at_path(state.path.as_path())
            .with_detail("files", changes.len().to_string())
            .with_detail("dry_run", "true"),
        );
        return Ok(());
    }

    // Rewrite atomically: dedicated branch, one commit, optional push.
    let stamp = Utc::now().format("%Y%m%d-%H%M%SZ");
    let branch = BranchName::new(format!("{branch_prefix}/{stamp}"))
        .map_err(|e| WorkflowError::InvalidOption {
            key: "branch_prefix".to_string(),
            message: e.to_string(),
        })?;
    env.repos.run(&state.path, &["switch", "-c", branch.as_str()])?;

    for (rel, contents) in &changes {
        env.fs.write(&state.path.as_path().join(rel), contents.as_bytes())?;
    }

    let mut add_args = vec!["add".to_string(), "--".to_string()];
    add_args.extend(changes.iter().map(|(rel, _)| rel.to_string_lossy().into_owned()));
    let add_refs: Vec<&str> = add_args.iter().map(String::as_str).collect();
    env.repos.run(&state.path, &add_refs)?;
    env.repos.run(&state.path, &["commit", "-m", &message])?;

    let mut pushed = false;
    let mut push_skip_reason: Option<String> = None;
    if push {
        if !env.repos.remote_configured(&state.path, &remote)? {
            env.reporter.report(
                Event::warn(
                    EventCode::RemoteMissing,
                    &repo_name,
                    format!("remote {remote} is not configured; rewrite kept locally"),
                )
                .at_path(state.path.as_path())
                .with_detail("branch", branch.as_str()),
            );
            push_skip_reason = Some("remote missing".to_string());
        } else {
            let head = env.repos.head_commit(&state.path)?;
            let remote_sha = env.repos.remote_head_sha(&state.path, &remote, &branch)?;
            if remote_sha.as_deref() == Some(head.as_str()) {
                push_skip_reason = Some("remote already up to date".to_string());
            } else {
                let output = env.exec.run_git(
                    CommandDetails::new([
                        "push",
                        "--set-upstream",
                        remote.as_str(),
                        branch.as_str(),
                    ])
                    .in_dir(state.path.as_path()),
                )?;
                if output.success() {
                    pushed = true;
                } else {
                    return Err(WorkflowError::NamespacePushFailed {
                        branch: branch.as_str().to_string(),
                        reason: output.summary(),
                    });
                }
            }
        }
    }

    let mut event = Event::info(
        EventCode::NamespaceRewrite,
        &repo_name,
        format!("rewrote {} file(s) onto {branch}", changes.len()),
    )
    .at_path(state.path.as_path())
    .with_detail("files", changes.len().to_string())
    .with_detail("branch", branch.as_str())
    .with_detail("pushed", pushed.to_string());
    if let Some(reason) = push_skip_reason {
        event = event.with_detail("push_skip", reason);
    }
    env.reporter.report(event);

    Ok(())
}

/// `go.mod` plus all Go sources, as repository-relative paths. The walk
/// honors gitignore; `check-ignore` stays the authoritative filter.
fn collect_candidates(state: &RepositoryState) -> Result<Vec<PathBuf>, WorkflowError> {
    let root = state.path.as_path();
    let mut candidates = Vec::new();
    for entry in WalkBuilder::new(root).build() {
        let entry = entry.map_err(|e| WorkflowError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == "go.mod" || name.ends_with(".go") {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                candidates.push(rel.to_path_buf());
            }
        }
    }
    candidates.sort();
    Ok(candidates)
}

/// One batched `check-ignore --stdin` call over the full candidate list.
fn drop_ignored(
    env: &Environment<'_>,
    state: &RepositoryState,
    candidates: Vec<PathBuf>,
) -> Result<Vec<PathBuf>, WorkflowError> {
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let stdin = candidates
        .iter()
        .map(|rel| rel.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    let output = env.exec.run_git(
        CommandDetails::new(["check-ignore", "--stdin"])
            .in_dir(state.path.as_path())
            .with_stdin(stdin.into_bytes()),
    )?;
    // Exit 1 means nothing matched.
    if output.status != 0 && output.status != 1 {
        return Err(WorkflowError::Shell(crate::shell_exec::ShellError::CommandFailed {
            command: "git check-ignore --stdin".to_string(),
            output,
        }));
    }
    let ignored: std::collections::HashSet<&str> = output.stdout.lines().map(str::trim).collect();
    Ok(candidates
        .into_iter()
        .filter(|rel| !ignored.contains(rel.to_string_lossy().as_ref()))
        .collect())
}

/// Rewrite the `module` directive. `None` when nothing changes.
fn rewrite_go_mod(contents: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let mut changed = false;
    let mut lines: Vec<String> = Vec::with_capacity(contents.lines().count());
    for line in contents.lines() {
        if let Some(path) = line.strip_prefix("module ") {
            let path = path.trim();
            if let Some(rewritten) = rewrite_module_path(path, old_prefix, new_prefix) {
                lines.push(format!("module {rewritten}"));
                changed = true;
                continue;
            }
        }
        lines.push(line.to_string());
    }
    if !changed {
        return None;
    }
    let mut result = lines.join("\n");
    if contents.ends_with('\n') {
        result.push('\n');
    }
    Some(result)
}

fn rewrite_module_path(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        Some(new_prefix.to_string())
    } else {
        path.strip_prefix(&format!("{old_prefix}/"))
            .map(|rest| format!("{new_prefix}/{rest}"))
    }
}

/// Rewrite quoted import paths under the old prefix. `None` when nothing
/// changes.
fn rewrite_imports(contents: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    let exact_old = format!("\"{old_prefix}\"");
    let exact_new = format!("\"{new_prefix}\"");
    let nested_old = format!("\"{old_prefix}/");
    let nested_new = format!("\"{new_prefix}/");
    let rewritten = contents.replace(&exact_old, &exact_new).replace(&nested_old, &nested_new);
    if rewritten == contents { None } else { Some(rewritten) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RepositoryPath;
    use crate::testing::{ScriptedExecutor, failed_output, ok_output};
    use crate::workflow::InspectionSnapshot;
    use crate::workflow::actions::tests::ActionHarness;
    use indexmap::indexmap;

    const OLD: &str = "github.com/old-org/example";
    const NEW: &str = "github.com/new-org/example";

    #[test]
    fn go_mod_module_directive_is_rewritten() {
        let contents = "module github.com/old-org/example\n\ngo 1.22\n";
        let rewritten = rewrite_go_mod(contents, OLD, NEW).unwrap();
        assert_eq!(rewritten, "module github.com/new-org/example\n\ngo 1.22\n");
    }

    #[test]
    fn go_mod_with_other_module_is_untouched() {
        let contents = "module github.com/elsewhere/tool\n";
        assert!(rewrite_go_mod(contents, OLD, NEW).is_none());
        // A prefix that merely shares leading characters must not match.
        let contents = "module github.com/old-org/example-extra\n";
        assert!(rewrite_go_mod(contents, OLD, NEW).is_none());
    }

    #[test]
    fn imports_rewrite_exact_and_nested_paths() {
        let contents = concat!(
            "import (\n",
            "\t\"github.com/old-org/example\"\n",
            "\t\"github.com/old-org/example/internal/db\"\n",
            "\t\"github.com/old-org/examplekit\"\n",
            ")\n",
        );
        let rewritten = rewrite_imports(contents, OLD, NEW).unwrap();
        assert!(rewritten.contains("\"github.com/new-org/example\""));
        assert!(rewritten.contains("\"github.com/new-org/example/internal/db\""));
        // Sibling module sharing the prefix text stays untouched.
        assert!(rewritten.contains("\"github.com/old-org/examplekit\""));
    }

    fn seed_repo(dir: &std::path::Path) {
        std::fs::write(dir.join("go.mod"), format!("module {OLD}\n\ngo 1.22\n")).unwrap();
        std::fs::write(
            dir.join("main.go"),
            format!("package main\n\nimport \"{OLD}/internal/db\"\n"),
        )
        .unwrap();
    }

    fn harness_state(dir: &std::path::Path, exec: ScriptedExecutor) -> (ActionHarness, RepositoryState) {
        let harness = ActionHarness::new(exec);
        let state = RepositoryState::new(
            RepositoryPath::new(dir).unwrap(),
            InspectionSnapshot::default(),
        );
        (harness, state)
    }

    fn rewrite_options() -> OptionMap {
        indexmap! {
            "old_prefix".to_string() => crate::workflow::OptionValue::String(OLD.to_string()),
            "new_prefix".to_string() => crate::workflow::OptionValue::String(NEW.to_string()),
            "push".to_string() => crate::workflow::OptionValue::Bool(false),
        }
    }

    #[test]
    fn rewrites_commit_on_timestamped_branch() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![(
            "check-ignore --stdin",
            failed_output(1, ""),
        )]);
        let (harness, mut state) = harness_state(tmp.path(), exec);

        run(&harness.env(), &mut state, &rewrite_options()).unwrap();

        let go_mod = std::fs::read_to_string(tmp.path().join("go.mod")).unwrap();
        assert!(go_mod.contains(NEW));
        let calls = harness.exec.calls();
        assert!(calls.iter().any(|c| c.contains("switch -c namespace-rewrite/")));
        assert!(calls.iter().any(|c| c.starts_with("git add -- go.mod main.go")));
        assert!(calls.iter().any(|c| c.starts_with("git commit -m")));
        assert!(harness.out.contents().contains("NAMESPACE_REWRITE"));
    }

    #[test]
    fn second_run_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![("check-ignore --stdin", failed_output(1, ""))]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        run(&harness.env(), &mut state, &rewrite_options()).unwrap();

        let go_mod_after_first = std::fs::read_to_string(tmp.path().join("go.mod")).unwrap();
        let main_after_first = std::fs::read_to_string(tmp.path().join("main.go")).unwrap();

        let exec = ScriptedExecutor::new(vec![("check-ignore --stdin", failed_output(1, ""))]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        run(&harness.env(), &mut state, &rewrite_options()).unwrap();

        assert_eq!(std::fs::read_to_string(tmp.path().join("go.mod")).unwrap(), go_mod_after_first);
        assert_eq!(std::fs::read_to_string(tmp.path().join("main.go")).unwrap(), main_after_first);
        // No branch, no commit, no file-change events on the second run.
        assert!(!harness.exec.call_made("switch -c"));
        assert!(!harness.exec.call_made("git commit"));
        assert!(harness.out.contents().contains("NAMESPACE_SKIP"));
    }

    #[test]
    fn gitignored_candidates_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        // check-ignore reports main.go as ignored; only go.mod changes.
        let exec = ScriptedExecutor::new(vec![(
            "check-ignore --stdin",
            ok_output("main.go\n"),
        )]);
        let (harness, mut state) = harness_state(tmp.path(), exec);

        run(&harness.env(), &mut state, &rewrite_options()).unwrap();

        let main_go = std::fs::read_to_string(tmp.path().join("main.go")).unwrap();
        assert!(main_go.contains(OLD), "ignored file must stay untouched");
        assert!(harness.exec.calls().iter().any(|c| c.starts_with("git add -- go.mod") && !c.contains("main.go")));
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![("check-ignore --stdin", failed_output(1, ""))]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        let mut options = rewrite_options();
        options.insert("dry_run".to_string(), crate::workflow::OptionValue::Bool(true));

        run(&harness.env(), &mut state, &options).unwrap();

        let go_mod = std::fs::read_to_string(tmp.path().join("go.mod")).unwrap();
        assert!(go_mod.contains(OLD));
        assert!(!harness.exec.call_made("switch -c"));
        assert!(harness.out.contents().contains("dry_run=true"));
    }

    #[test]
    fn missing_remote_keeps_local_commit_and_warns() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![
            ("check-ignore --stdin", failed_output(1, "")),
            // remote.origin.url unset
            ("config --get remote.origin.url", failed_output(1, "")),
        ]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        let mut options = rewrite_options();
        options.insert("push".to_string(), crate::workflow::OptionValue::Bool(true));

        run(&harness.env(), &mut state, &options).unwrap();

        assert!(harness.exec.call_made("git commit"));
        assert!(!harness.exec.call_made("git push"));
        assert!(harness.out.contents().contains("REMOTE_MISSING"));
    }

    #[test]
    fn push_failure_keeps_local_commit() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![
            ("check-ignore --stdin", failed_output(1, "")),
            ("config --get remote.origin.url", ok_output("git@github.com:new-org/example.git\n")),
            ("rev-parse HEAD", ok_output("aaaa\n")),
            ("ls-remote --heads origin", ok_output("")),
            ("push --set-upstream origin", failed_output(1, "remote: permission denied\n")),
        ]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        let mut options = rewrite_options();
        options.insert("push".to_string(), crate::workflow::OptionValue::Bool(true));

        let result = run(&harness.env(), &mut state, &options);
        assert!(matches!(result, Err(WorkflowError::NamespacePushFailed { .. })));
        assert!(harness.exec.call_made("git commit"));
    }

    #[test]
    fn up_to_date_remote_skips_push() {
        let tmp = tempfile::tempdir().unwrap();
        seed_repo(tmp.path());
        let exec = ScriptedExecutor::new(vec![
            ("check-ignore --stdin", failed_output(1, "")),
            ("config --get remote.origin.url", ok_output("git@github.com:new-org/example.git\n")),
            ("rev-parse HEAD", ok_output("aaaa\n")),
            ("ls-remote --heads origin", ok_output("aaaa\trefs/heads/namespace-rewrite/x\n")),
        ]);
        let (harness, mut state) = harness_state(tmp.path(), exec);
        let mut options = rewrite_options();
        options.insert("push".to_string(), crate::workflow::OptionValue::Bool(true));

        run(&harness.env(), &mut state, &options).unwrap();

        assert!(!harness.exec.call_made("git push"));
        assert!(harness.out.contents().contains("push_skip=remote already up to date"));
    }
}
