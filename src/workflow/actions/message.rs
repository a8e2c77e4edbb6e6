//! Commit-message generation: gather status and diff, ask the chat client
//! for a message, print it through the reporter.

use std::time::Duration;

use crate::llm::ChatRequest;
use crate::report::{Event, EventCode};
use crate::workflow::registry::{float_option, int_option, string_option};
use crate::workflow::{Environment, OptionMap, RepositoryState, WorkflowError};

/// Upper bound on each context section handed to the chat client.
const MAX_SECTION_CHARS: usize = 16_000;

/// Composition rules sent as the system message.
const COMPOSITION_RULES: &str = "\
You write Git commit messages.
- First line: under 50 characters, present tense, states WHAT changed and WHY.
- Blank line after the first line.
- Optional detail paragraphs with proper line breaks for substantial changes.
- Base the message only on the supplied status and diff.
- Return ONLY the commit message, without quotes, code fences, or preamble.";

/// Which diff the message describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffSource {
    Staged,
    Worktree,
}

impl DiffSource {
    fn parse(value: Option<&str>) -> Result<Self, WorkflowError> {
        match value {
            None | Some("staged") => Ok(DiffSource::Staged),
            Some("worktree") => Ok(DiffSource::Worktree),
            Some(other) => Err(WorkflowError::InvalidOption {
                key: "diff_source".to_string(),
                message: format!("expected \"staged\" or \"worktree\", got {other:?}"),
            }),
        }
    }

    fn label(self) -> &'static str {
        match self {
            DiffSource::Staged => "staged",
            DiffSource::Worktree => "worktree",
        }
    }
}

/// Truncate to a character budget, marking the cut.
fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}\n[truncated]")
}

fn build_user_prompt(
    repo_label: &str,
    source: DiffSource,
    status: &str,
    summary: &str,
    patch: &str,
    instruction: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Repository: {repo_label}\nDiff source: {}\n\n<status>\n{status}\n</status>\n\n<summary>\n{summary}\n</summary>\n\n<patch>\n{patch}\n</patch>\n",
        source.label()
    );
    if let Some(instruction) = instruction {
        prompt.push_str(&format!("\nAdditional instruction: {instruction}\n"));
    }
    prompt.push_str("\nWrite the commit message now.");
    prompt
}

pub(crate) fn run(
    env: &Environment<'_>,
    state: &mut RepositoryState,
    options: &OptionMap,
) -> Result<(), WorkflowError> {
    let source = DiffSource::parse(string_option(options, "diff_source")?.as_deref())?;
    let instruction = string_option(options, "instruction")?;

    let status = env.repos.run(&state.path, &["status", "--short"])?;
    let (summary, patch) = match source {
        DiffSource::Staged => (
            env.repos.run(&state.path, &["diff", "--unified=3", "--cached", "--stat"])?,
            env.repos.run(&state.path, &["diff", "--unified=3", "--cached"])?,
        ),
        DiffSource::Worktree => (
            env.repos.run(&state.path, &["diff", "--unified=3", "--stat"])?,
            env.repos.run(&state.path, &["diff", "--unified=3"])?,
        ),
    };

    if status.trim().is_empty() && summary.trim().is_empty() && patch.trim().is_empty() {
        return Err(WorkflowError::NoChanges);
    }

    let chat = env.chat.ok_or(WorkflowError::DependencyMissing { name: "chat client" })?;
    let repo_label = state.name();

    let max_tokens = match int_option(options, "max_tokens")? {
        Some(value) if value <= 0 => {
            return Err(WorkflowError::InvalidOption {
                key: "max_tokens".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Some(value) => Some(value as u32),
        None => None,
    };
    let timeout = match int_option(options, "timeout_seconds")? {
        Some(value) if value <= 0 => {
            return Err(WorkflowError::InvalidOption {
                key: "timeout_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Some(value) => Some(Duration::from_secs(value as u64)),
        None => None,
    };

    let request = ChatRequest {
        system: COMPOSITION_RULES.to_string(),
        user: build_user_prompt(
            &repo_label,
            source,
            &truncate_chars(&status, MAX_SECTION_CHARS),
            &truncate_chars(&summary, MAX_SECTION_CHARS),
            &truncate_chars(&patch, MAX_SECTION_CHARS),
            instruction.as_deref(),
        ),
        model: string_option(options, "model")?,
        max_tokens,
        temperature: float_option(options, "temperature")?.map(|t| t as f32),
        timeout,
    };

    let message = chat.chat(&request).map_err(WorkflowError::Chat)?;
    if message.trim().is_empty() {
        return Err(WorkflowError::EmptyLlmResponse);
    }

    env.reporter.report(
        Event::info(EventCode::CommitMessage, &repo_label, "generated commit message")
            .at_path(state.path.as_path())
            .with_detail("diff_source", source.label())
            .with_detail("chars", message.chars().count().to_string()),
    );
    env.reporter.print_data(&message);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::PromptState;
    use crate::domain::RepositoryPath;
    use crate::testing::{ScriptedChat, ScriptedExecutor, ok_output};
    use crate::workflow::InspectionSnapshot;
    use crate::workflow::actions::tests::ActionHarness;
    use indexmap::indexmap;

    fn state() -> RepositoryState {
        RepositoryState::new(
            RepositoryPath::new("/tmp/example").unwrap(),
            InspectionSnapshot::default(),
        )
    }

    fn env_with_chat<'a>(
        harness: &'a ActionHarness,
        chat: &'a ScriptedChat,
    ) -> Environment<'a> {
        Environment {
            exec: harness.exec.as_ref(),
            repos: &harness.repos,
            github: &harness.github,
            fs: &harness.fs,
            reporter: &harness.reporter,
            prompter: &harness.prompter,
            chat: Some(chat),
            options: &harness.options,
            cancel: &harness.cancel,
            prompts: PromptState::new(),
        }
    }

    #[test]
    fn empty_worktree_is_no_changes() {
        let harness = ActionHarness::new(ScriptedExecutor::silent());
        let chat = ScriptedChat::new("unused");
        let mut state = state();
        let result = run(&env_with_chat(&harness, &chat), &mut state, &OptionMap::new());
        assert!(matches!(result, Err(WorkflowError::NoChanges)));
        assert!(chat.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn staged_diff_flows_into_the_prompt() {
        let exec = ScriptedExecutor::new(vec![
            ("status --short", ok_output("M  src/lib.rs\n")),
            ("diff --unified=3 --cached --stat", ok_output(" src/lib.rs | 2 +-\n")),
            ("diff --unified=3 --cached", ok_output("--- a/src/lib.rs\n+++ b/src/lib.rs\n")),
        ]);
        let harness = ActionHarness::new(exec);
        let chat = ScriptedChat::new("Fix the frobnicator\n");
        let mut state = state();

        run(&env_with_chat(&harness, &chat), &mut state, &OptionMap::new()).unwrap();

        let requests = chat.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.contains("Diff source: staged"));
        assert!(requests[0].user.contains("src/lib.rs | 2 +-"));
        assert!(requests[0].system.contains("commit messages"));

        let output = harness.out.contents();
        assert!(output.contains("COMMIT_MESSAGE"));
        assert!(output.contains("Fix the frobnicator"));
    }

    #[test]
    fn worktree_source_uses_uncached_diff() {
        let exec = ScriptedExecutor::new(vec![
            ("status --short", ok_output("M  src/lib.rs\n")),
            ("diff --unified=3 --stat", ok_output(" src/lib.rs | 1 +\n")),
            ("diff --unified=3", ok_output("@@ -1 +1 @@\n")),
        ]);
        let harness = ActionHarness::new(exec);
        let chat = ScriptedChat::new("Describe worktree changes");
        let mut state = state();
        let options = indexmap! {
            "diff_source".to_string() =>
                crate::workflow::OptionValue::String("worktree".to_string()),
        };

        run(&env_with_chat(&harness, &chat), &mut state, &options).unwrap();
        assert!(!harness.exec.call_made("--cached"));
    }

    #[test]
    fn empty_completion_is_an_error() {
        let exec = ScriptedExecutor::new(vec![("status --short", ok_output("M  a.go\n"))]);
        let harness = ActionHarness::new(exec);
        let chat = ScriptedChat::new("   ");
        let mut state = state();
        let result = run(&env_with_chat(&harness, &chat), &mut state, &OptionMap::new());
        assert!(matches!(result, Err(WorkflowError::EmptyLlmResponse)));
    }

    #[test]
    fn missing_chat_client_is_a_dependency_error() {
        let exec = ScriptedExecutor::new(vec![("status --short", ok_output("M  a.go\n"))]);
        let harness = ActionHarness::new(exec);
        let mut state = state();
        let result = run(&harness.env(), &mut state, &OptionMap::new());
        assert!(matches!(result, Err(WorkflowError::DependencyMissing { .. })));
    }

    #[test]
    fn oversized_sections_are_truncated() {
        let long = "x".repeat(MAX_SECTION_CHARS + 100);
        let truncated = truncate_chars(&long, MAX_SECTION_CHARS);
        assert!(truncated.ends_with("[truncated]"));
        assert!(truncated.chars().count() < long.chars().count());
        assert_eq!(truncate_chars("short", MAX_SECTION_CHARS), "short");
    }
}
