//! Branch cleanup: delete remote and local branches whose pull requests
//! are closed, one confirmation per branch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::report::{Event, EventCode};
use crate::shell_exec::CommandDetails;
use crate::workflow::registry::{int_option, string_option};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

const DEFAULT_PR_LIMIT: i64 = 100;
/// Cap on verbatim failure lines in the summary event.
const MAX_FAILURE_LINES: usize = 5;

static CREDENTIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://[^@/\s]+@").expect("credential regex is valid"));

/// Replace `https://<user>@` credentials embedded in git output.
fn scrub_credentials(text: &str) -> String {
    CREDENTIAL_RE.replace_all(text, "https://***@").into_owned()
}

#[derive(Deserialize)]
struct ClosedPr {
    #[serde(rename = "headRefName")]
    head_ref_name: String,
}

#[derive(Default)]
struct CleanupCounts {
    closed: usize,
    deleted: usize,
    declined: usize,
    failed_prompt: usize,
    failed_remote: usize,
    failed_local: usize,
}

impl CleanupCounts {
    fn failed(&self) -> usize {
        self.failed_prompt + self.failed_remote + self.failed_local
    }
}

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let remote = crate::workflow::planner::parse_remote_option(string_option(options, "remote")?)?
        .unwrap_or_else(|| env.remote());
    let limit = int_option(options, "limit")?.unwrap_or(DEFAULT_PR_LIMIT);
    if limit <= 0 {
        return Err(WorkflowError::InvalidOption {
            key: "limit".to_string(),
            message: "limit must be positive".to_string(),
        });
    }

    let repo_name = state.name();
    if !env.repos.remote_configured(&state.path, &remote)? {
        env.reporter.report(
            Event::warn(
                EventCode::RemoteMissing,
                &repo_name,
                format!("remote {remote} is not configured; nothing to clean up"),
            )
            .at_path(state.path.as_path()),
        );
        return Ok(());
    }

    let remote_branches = env.repos.remote_heads(&state.path, &remote)?;

    let limit_text = limit.to_string();
    let output = env.exec.execute_gh(
        CommandDetails::new([
            "pr",
            "list",
            "--state",
            "closed",
            "--json",
            "headRefName",
            "--limit",
            limit_text.as_str(),
        ])
        .in_dir(state.path.as_path())
        .require_token(),
    )?;
    let closed: Vec<ClosedPr> = serde_json::from_str(&output.stdout)
        .map_err(|e| WorkflowError::InvalidOption {
            key: "pr list".to_string(),
            message: format!("unexpected gh output: {e}"),
        })?;
    let closed_refs: std::collections::HashSet<&str> =
        closed.iter().map(|pr| pr.head_ref_name.as_str()).collect();

    // Remote order is preserved so runs are reproducible.
    let targets: Vec<_> = remote_branches
        .iter()
        .filter(|branch| closed_refs.contains(branch.as_str()))
        .collect();

    let mut counts = CleanupCounts { closed: targets.len(), ..CleanupCounts::default() };
    let mut failure_lines: Vec<String> = Vec::new();

    for branch in targets {
        let prompt = format!("Delete remote and local branch '{branch}' of {repo_name}?");
        let confirmed = match env.confirm(&prompt) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                counts.failed_prompt += 1;
                failure_lines.push(format!("{branch}: prompt failed: {err}"));
                continue;
            }
        };
        if !confirmed {
            counts.declined += 1;
            env.reporter.report(
                Event::warn(EventCode::DeleteSkip, &repo_name, format!("kept branch {branch}"))
                    .at_path(state.path.as_path())
                    .with_detail("branch", branch.as_str()),
            );
            continue;
        }

        let push_output = env.exec.run_git(
            CommandDetails::new(["push", remote.as_str(), "--delete", branch.as_str()])
                .in_dir(state.path.as_path()),
        )?;
        if !push_output.success() {
            counts.failed_remote += 1;
            failure_lines.push(format!(
                "{branch}: remote deletion failed: {}",
                scrub_credentials(&push_output.summary())
            ));
            continue;
        }

        if env.repos.branch_exists(&state.path, branch)? {
            let local_output = env.exec.run_git(
                CommandDetails::new(["branch", "-D", branch.as_str()])
                    .in_dir(state.path.as_path()),
            )?;
            if !local_output.success() {
                counts.failed_local += 1;
                failure_lines.push(format!(
                    "{branch}: local deletion failed: {}",
                    local_output.summary()
                ));
                continue;
            }
        }

        counts.deleted += 1;
        env.reporter.report(
            Event::info(EventCode::BranchDeleted, &repo_name, format!("deleted branch {branch}"))
                .at_path(state.path.as_path())
                .with_detail("branch", branch.as_str())
                .with_detail("remote", remote.as_str()),
        );
    }

    let mut event = Event::info(
        EventCode::BranchCleanup,
        &repo_name,
        format!(
            "cleanup finished: {} closed, {} deleted, {} declined, {} failed",
            counts.closed,
            counts.deleted,
            counts.declined,
            counts.failed()
        ),
    )
    .at_path(state.path.as_path())
    .with_detail("closed", counts.closed.to_string())
    .with_detail("deleted", counts.deleted.to_string())
    .with_detail("declined", counts.declined.to_string())
    .with_detail("failed", counts.failed().to_string());
    for (index, line) in failure_lines.iter().take(MAX_FAILURE_LINES).enumerate() {
        event = event.with_detail(format!("failure_{}", index + 1), line);
    }
    if failure_lines.len() > MAX_FAILURE_LINES {
        event = event.with_detail(
            "remaining",
            (failure_lines.len() - MAX_FAILURE_LINES).to_string(),
        );
    }
    env.reporter.report(event);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::Confirmation;
    use crate::domain::RepositoryPath;
    use crate::testing::{ScriptedExecutor, ScriptedPrompter, failed_output, ok_output};
    use crate::workflow::InspectionSnapshot;
    use crate::workflow::actions::tests::ActionHarness;

    fn state() -> RepositoryState {
        RepositoryState::new(
            RepositoryPath::new("/tmp/example").unwrap(),
            InspectionSnapshot::default(),
        )
    }

    fn exec_with_closed_pr(branch: &str) -> ScriptedExecutor {
        ScriptedExecutor::new(vec![
            (
                "config --get remote.origin.url",
                ok_output("git@github.com:canonical/example.git\n"),
            ),
            (
                "ls-remote --heads origin",
                ok_output(&format!("aaaa\trefs/heads/{branch}\n")),
            ),
            (
                "pr list --state closed",
                ok_output(&format!("[{{\"headRefName\":\"{branch}\"}}]")),
            ),
        ])
    }

    #[test]
    fn declined_branch_is_kept() {
        // Scenario: one closed PR branch, user answers no.
        let harness = ActionHarness::with_prompter(
            exec_with_closed_pr("feature/user-decline"),
            ScriptedPrompter::always(false),
        );
        let mut state = state();

        run(&harness.env(), &mut state, &OptionMap::new()).unwrap();

        assert!(!harness.exec.call_made("--delete"));
        assert!(!harness.exec.call_made("branch -D"));
        let output = harness.out.contents();
        assert!(output.contains("DELETE_SKIP"));
        assert!(output.contains("closed=1"));
        assert!(output.contains("deleted=0"));
        assert!(output.contains("declined=1"));
        assert!(output.contains("failed=0"));
    }

    #[test]
    fn confirmed_branch_is_deleted_remotely_and_locally() {
        let exec = ScriptedExecutor::new(vec![
            (
                "rev-parse --verify --quiet refs/heads/feature/done",
                ok_output("aaaa\n"),
            ),
            (
                "config --get remote.origin.url",
                ok_output("git@github.com:canonical/example.git\n"),
            ),
            ("ls-remote --heads origin", ok_output("aaaa\trefs/heads/feature/done\n")),
            ("pr list --state closed", ok_output("[{\"headRefName\":\"feature/done\"}]")),
        ]);
        let harness = ActionHarness::with_prompter(exec, ScriptedPrompter::always(true));
        let mut state = state();

        run(&harness.env(), &mut state, &OptionMap::new()).unwrap();

        assert!(harness.exec.call_made("push origin --delete feature/done"));
        assert!(harness.exec.call_made("branch -D feature/done"));
        let output = harness.out.contents();
        assert!(output.contains("BRANCH_DELETED"));
        assert!(output.contains("deleted=1"));
    }

    #[test]
    fn remote_failure_is_scrubbed_and_counted() {
        let exec = ScriptedExecutor::new(vec![
            (
                "config --get remote.origin.url",
                ok_output("https://ci-bot@github.com/canonical/example.git\n"),
            ),
            ("ls-remote --heads origin", ok_output("aaaa\trefs/heads/stale\n")),
            ("pr list --state closed", ok_output("[{\"headRefName\":\"stale\"}]")),
            (
                "push origin --delete stale",
                failed_output(1, "fatal: unable to access 'https://ci-bot@github.com/x': denied\n"),
            ),
        ]);
        let harness = ActionHarness::with_prompter(exec, ScriptedPrompter::always(true));
        let mut state = state();

        run(&harness.env(), &mut state, &OptionMap::new()).unwrap();

        let output = harness.out.contents();
        assert!(output.contains("failed=1"));
        assert!(output.contains("https://***@github.com"));
        assert!(!output.contains("ci-bot@"));
        // Local deletion is not attempted after a remote failure.
        assert!(!harness.exec.call_made("branch -D"));
    }

    #[test]
    fn apply_to_all_confirms_remaining_branches() {
        let exec = ScriptedExecutor::new(vec![
            (
                "config --get remote.origin.url",
                ok_output("git@github.com:canonical/example.git\n"),
            ),
            (
                "ls-remote --heads origin",
                ok_output("aaaa\trefs/heads/one\nbbbb\trefs/heads/two\n"),
            ),
            (
                "pr list --state closed",
                ok_output("[{\"headRefName\":\"one\"},{\"headRefName\":\"two\"}]"),
            ),
        ]);
        let prompter = ScriptedPrompter::new(vec![
            Confirmation { confirmed: true, apply_to_all: true },
        ]);
        let harness = ActionHarness::with_prompter(exec, prompter);
        let mut state = state();

        run(&harness.env(), &mut state, &OptionMap::new()).unwrap();

        // One "a" answer confirms both branches with a single prompt.
        assert_eq!(harness.prompter.prompts().len(), 1);
        assert!(harness.out.contents().contains("deleted=2"));
    }

    #[test]
    fn unconfigured_remote_warns_and_returns() {
        let exec = ScriptedExecutor::new(vec![(
            "config --get remote.origin.url",
            failed_output(1, ""),
        )]);
        let harness = ActionHarness::new(exec);
        let mut state = state();

        run(&harness.env(), &mut state, &OptionMap::new()).unwrap();
        assert!(harness.out.contents().contains("REMOTE_MISSING"));
        assert!(!harness.exec.call_made("ls-remote"));
    }

    #[test]
    fn credential_scrubbing() {
        assert_eq!(
            scrub_credentials("fatal: https://alice@github.com/x denied"),
            "fatal: https://***@github.com/x denied"
        );
        assert_eq!(scrub_credentials("no credentials here"), "no credentials here");
    }
}
