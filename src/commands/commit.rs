//! `gf commit message` — generate a commit message for the current repo.

use std::sync::Arc;

use gitfleet::confirm::PromptState;
use gitfleet::fsys::StdFileSystem;
use gitfleet::github::GitHubResolver;
use gitfleet::llm::CommandChatClient;
use gitfleet::repo::RepositoryManager;
use gitfleet::workflow::registry::ActionRegistry;
use gitfleet::workflow::{
    CancellationToken, Environment, InspectionSnapshot, OptionMap, OptionValue, RepositoryState,
};

use super::AppContext;

#[allow(clippy::too_many_arguments)]
pub fn handle_commit_message(
    ctx: &AppContext,
    diff_source: &str,
    model: Option<String>,
    api_key_env: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_seconds: Option<u64>,
    chat_command: String,
) -> anyhow::Result<()> {
    let path = ctx.current_repository()?;
    let manager = RepositoryManager::new(Arc::clone(&ctx.exec));
    let resolver = GitHubResolver::new(Arc::clone(&ctx.exec));
    let fs = StdFileSystem;
    let chat = CommandChatClient::new(chat_command, Vec::new(), api_key_env);
    let cancel = CancellationToken::new();

    let env = Environment {
        exec: ctx.exec.as_ref(),
        repos: &manager,
        github: &resolver,
        fs: &fs,
        reporter: &ctx.reporter,
        prompter: ctx.prompter.as_ref(),
        chat: Some(&chat),
        options: &ctx.options,
        cancel: &cancel,
        prompts: PromptState::new(),
    };
    let mut state = RepositoryState::new(path, InspectionSnapshot::default());

    let mut options = OptionMap::new();
    options.insert("diff_source".to_string(), OptionValue::String(diff_source.to_string()));
    if let Some(model) = model {
        options.insert("model".to_string(), OptionValue::String(model));
    }
    if let Some(max_tokens) = max_tokens {
        options.insert("max_tokens".to_string(), OptionValue::Int(i64::from(max_tokens)));
    }
    if let Some(temperature) = temperature {
        options.insert("temperature".to_string(), OptionValue::Float(f64::from(temperature)));
    }
    if let Some(timeout) = timeout_seconds {
        options.insert("timeout_seconds".to_string(), OptionValue::Int(timeout as i64));
    }

    let handler = ActionRegistry::builtin().get("commit-message")?;
    handler(&env, &mut state, &options)?;
    Ok(())
}
