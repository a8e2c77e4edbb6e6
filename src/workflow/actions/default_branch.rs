//! Default-branch migration: move the remote default branch to a target,
//! then retarget what referenced the old one.
//!
//! Only the remote default-branch update itself is fatal; PR retargeting,
//! branch protection, Pages, and old-branch deletion each degrade to a WARN
//! skip event so a partially locked-down repository still migrates.

use serde::Deserialize;

use crate::domain::{BranchName, OwnerRepository};
use crate::report::{Event, EventCode};
use crate::shell_exec::CommandDetails;
use crate::workflow::registry::{bool_option, required_string_option, string_option};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

#[derive(Deserialize)]
struct OpenPr {
    number: u64,
}

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let target = BranchName::new(required_string_option(options, "target")?).map_err(|e| {
        WorkflowError::InvalidOption { key: "target".to_string(), message: e.to_string() }
    })?;
    let delete_old = bool_option(options, "delete_old", false)?;
    let remote = crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?
        .unwrap_or_else(|| env.remote());

    let repo_name = state.name();
    let metadata = env
        .github
        .resolve(&state.path)
        .map_err(WorkflowError::Shell)?
        .ok_or(WorkflowError::DependencyMissing { name: "GitHub metadata" })?;
    let old = metadata
        .default_branch
        .clone()
        .ok_or_else(|| WorkflowError::InvalidOption {
            key: "target".to_string(),
            message: "repository has no default branch to migrate from".to_string(),
        })?;

    if old == target {
        env.reporter.report(
            Event::info(
                EventCode::DefaultBranch,
                &repo_name,
                format!("default branch is already {target}"),
            )
            .at_path(state.path.as_path()),
        );
        return Ok(());
    }

    // Local preparation: make sure the target branch exists and is pushed.
    env.repos.run(&state.path, &["fetch", remote.as_str()])?;
    if !env.repos.branch_exists(&state.path, &target)? {
        let start = format!("{remote}/{old}");
        env.repos.create_branch(&state.path, &target, Some(&start))?;
    }
    env.repos.run(
        &state.path,
        &["push", "--set-upstream", remote.as_str(), target.as_str()],
    )?;

    // The remote default-branch update is the one step that must succeed.
    env.exec.execute_gh(
        CommandDetails::new(["repo", "edit", "--default-branch", target.as_str()])
            .in_dir(state.path.as_path())
            .require_token(),
    )?;

    retarget_open_prs(env, state, &repo_name, &old, &target);
    migrate_branch_protection(env, state, &repo_name, &metadata.canonical, &old, &target);
    migrate_pages(env, state, &repo_name, &metadata.canonical, &old, &target);

    env.repos.run(&state.path, &["remote", "set-head", remote.as_str(), target.as_str()])?;

    if delete_old {
        let prompt = format!("Delete old default branch '{old}' on {remote}?");
        if env.confirm(&prompt)? {
            let output = env.exec.run_git(
                CommandDetails::new(["push", remote.as_str(), "--delete", old.as_str()])
                    .in_dir(state.path.as_path()),
            )?;
            if !output.success() {
                env.reporter.report(
                    Event::warn(
                        EventCode::DeleteSkip,
                        &repo_name,
                        format!("could not delete old default branch {old}"),
                    )
                    .at_path(state.path.as_path())
                    .with_detail("reason", output.summary()),
                );
            }
        } else {
            env.reporter.report(
                Event::warn(EventCode::DeleteSkip, &repo_name, format!("kept old branch {old}"))
                    .at_path(state.path.as_path())
                    .with_detail("branch", old.as_str()),
            );
        }
    }

    env.reporter.report(
        Event::info(
            EventCode::DefaultBranch,
            &repo_name,
            format!("default branch migrated from {old} to {target}"),
        )
        .at_path(state.path.as_path())
        .with_detail("from", old.as_str())
        .with_detail("to", target.as_str()),
    );

    Ok(())
}

/// Point open PRs based on the old branch at the new one. Failures degrade
/// per-PR.
fn retarget_open_prs(
    env: &Environment<'_>,
    state: &RepositoryState,
    repo_name: &str,
    old: &BranchName,
    target: &BranchName,
) {
    let listed = env.exec.execute_gh(
        CommandDetails::new([
            "pr",
            "list",
            "--base",
            old.as_str(),
            "--state",
            "open",
            "--json",
            "number",
        ])
        .in_dir(state.path.as_path())
        .require_token(),
    );
    let prs: Vec<OpenPr> = match listed.map(|output| serde_json::from_str::<Vec<OpenPr>>(&output.stdout)) {
        Ok(Ok(prs)) => prs,
        Ok(Err(parse_err)) => {
            report_retarget_skip(env, state, repo_name, &format!("unexpected gh output: {parse_err}"));
            return;
        }
        Err(err) => {
            report_retarget_skip(env, state, repo_name, &err.summary());
            return;
        }
    };

    for pr in prs {
        let number = pr.number.to_string();
        let result = env.exec.execute_gh(
            CommandDetails::new(["pr", "edit", number.as_str(), "--base", target.as_str()])
                .in_dir(state.path.as_path())
                .require_token(),
        );
        if let Err(err) = result {
            report_retarget_skip(env, state, repo_name, &format!("PR #{number}: {}", err.summary()));
        }
    }
}

fn report_retarget_skip(env: &Environment<'_>, state: &RepositoryState, repo_name: &str, reason: &str) {
    env.reporter.report(
        Event::warn(EventCode::PrRetargetSkip, repo_name, "could not retarget pull requests")
            .at_path(state.path.as_path())
            .with_detail("reason", reason),
    );
}

/// Copy branch protection from the old branch. Any API failure degrades.
fn migrate_branch_protection(
    env: &Environment<'_>,
    state: &RepositoryState,
    repo_name: &str,
    canonical: &OwnerRepository,
    old: &BranchName,
    target: &BranchName,
) {
    let endpoint = format!("repos/{canonical}/branches/{old}/protection");
    let result = env.exec.execute_gh(
        CommandDetails::new(["api", endpoint.as_str()])
            .in_dir(state.path.as_path())
            .require_token(),
    );
    match result {
        Ok(_) => {
            // Protection exists on the old branch but rule copying needs
            // repository-admin PUT payloads that often 403; degrade rather
            // than half-apply.
            env.reporter.report(
                Event::warn(
                    EventCode::ProtectionSkip,
                    repo_name,
                    format!("branch protection on {old} must be moved to {target} manually"),
                )
                .at_path(state.path.as_path())
                .with_detail("from", old.as_str())
                .with_detail("to", target.as_str()),
            );
        }
        Err(err) => {
            log::debug!("no branch protection to migrate for {repo_name}: {}", err.summary());
        }
    }
}

/// Repoint GitHub Pages when it builds from the old branch.
fn migrate_pages(
    env: &Environment<'_>,
    state: &RepositoryState,
    repo_name: &str,
    canonical: &OwnerRepository,
    old: &BranchName,
    target: &BranchName,
) {
    let endpoint = format!("repos/{canonical}/pages");
    let lookup = env.exec.execute_gh(
        CommandDetails::new(["api", endpoint.as_str()])
            .in_dir(state.path.as_path())
            .require_token(),
    );
    let body = match lookup {
        Ok(output) => output.stdout,
        // No Pages configured: nothing to migrate.
        Err(_) => return,
    };
    let uses_old_branch = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["source"]["branch"].as_str().map(|b| b == old.as_str()))
        .unwrap_or(false);
    if !uses_old_branch {
        return;
    }

    let field = format!("source[branch]={target}");
    let result = env.exec.execute_gh(
        CommandDetails::new(["api", "--method", "PUT", endpoint.as_str(), "-f", field.as_str()])
            .in_dir(state.path.as_path())
            .require_token(),
    );
    if let Err(err) = result {
        env.reporter.report(
            Event::warn(EventCode::PagesSkip, repo_name, "could not repoint GitHub Pages")
                .at_path(state.path.as_path())
                .with_detail("reason", err.summary()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RepositoryPath;
    use crate::testing::{ScriptedExecutor, failed_output, ok_output};
    use crate::workflow::InspectionSnapshot;
    use crate::workflow::actions::tests::ActionHarness;
    use indexmap::indexmap;

    fn options() -> OptionMap {
        indexmap! {
            "target".to_string() => crate::workflow::OptionValue::String("main".to_string()),
        }
    }

    fn state() -> RepositoryState {
        RepositoryState::new(
            RepositoryPath::new("/tmp/example").unwrap(),
            InspectionSnapshot::default(),
        )
    }

    fn view_payload(default: &str) -> String {
        format!(
            "{{\"nameWithOwner\":\"canonical/example\",\"defaultBranchRef\":{{\"name\":\"{default}\"}}}}"
        )
    }

    #[test]
    fn noop_when_already_on_target() {
        let exec = ScriptedExecutor::new(vec![("repo view --json", ok_output(&view_payload("main")))]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();

        assert!(!harness.exec.call_made("repo edit"));
        assert!(harness.out.contents().contains("already"));
    }

    #[test]
    fn migration_updates_remote_default_and_sets_head() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", ok_output(&view_payload("master"))),
            ("rev-parse --verify --quiet refs/heads/main", ok_output("aaaa\n")),
            ("pr list --base master", ok_output("[]")),
            // no protection, no pages
            ("api repos/canonical/example/branches/master/protection", failed_output(1, "404")),
            ("api repos/canonical/example/pages", failed_output(1, "404")),
        ]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();

        assert!(harness.exec.call_made("push --set-upstream origin main"));
        assert!(harness.exec.call_made("repo edit --default-branch main"));
        assert!(harness.exec.call_made("remote set-head origin main"));
        let output = harness.out.contents();
        assert!(output.contains("DEFAULT_BRANCH"));
        assert!(output.contains("from=master"));
        assert!(output.contains("to=main"));
    }

    #[test]
    fn missing_target_branch_is_created_from_old_default() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", ok_output(&view_payload("master"))),
            ("rev-parse --verify --quiet refs/heads/main", failed_output(1, "")),
            ("pr list --base master", ok_output("[]")),
            ("api repos/canonical/example/branches/master/protection", failed_output(1, "404")),
            ("api repos/canonical/example/pages", failed_output(1, "404")),
        ]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();
        assert!(harness.exec.call_made("branch main origin/master"));
    }

    #[test]
    fn retarget_failures_degrade_to_warn() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", ok_output(&view_payload("master"))),
            ("rev-parse --verify --quiet refs/heads/main", ok_output("aaaa\n")),
            ("pr list --base master", ok_output("[{\"number\":7}]")),
            ("pr edit 7", failed_output(1, "GraphQL: not permitted\n")),
            ("api repos/canonical/example/branches/master/protection", failed_output(1, "404")),
            ("api repos/canonical/example/pages", failed_output(1, "404")),
        ]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();

        let output = harness.out.contents();
        assert!(output.contains("PR_RETARGET_SKIP"));
        assert!(output.contains("DEFAULT_BRANCH"));
    }

    #[test]
    fn existing_protection_reports_protection_skip() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", ok_output(&view_payload("master"))),
            ("rev-parse --verify --quiet refs/heads/main", ok_output("aaaa\n")),
            ("pr list --base master", ok_output("[]")),
            (
                "api repos/canonical/example/branches/master/protection",
                ok_output("{\"required_status_checks\":null}"),
            ),
            ("api repos/canonical/example/pages", failed_output(1, "404")),
        ]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();
        assert!(harness.out.contents().contains("PROTECTION_SKIP"));
    }

    #[test]
    fn pages_on_old_branch_is_repointed_or_skipped() {
        let exec = ScriptedExecutor::new(vec![
            ("repo view --json", ok_output(&view_payload("master"))),
            ("rev-parse --verify --quiet refs/heads/main", ok_output("aaaa\n")),
            ("pr list --base master", ok_output("[]")),
            ("api repos/canonical/example/branches/master/protection", failed_output(1, "404")),
            ("api --method PUT repos/canonical/example/pages", failed_output(1, "403")),
            (
                "api repos/canonical/example/pages",
                ok_output("{\"source\":{\"branch\":\"master\"}}"),
            ),
        ]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &options()).unwrap();
        assert!(harness.out.contents().contains("PAGES_SKIP"));
    }
}
