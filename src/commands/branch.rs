//! `gf branch default` — migrate the default branch of the current repo.

use std::sync::Arc;

use gitfleet::confirm::PromptState;
use gitfleet::fsys::StdFileSystem;
use gitfleet::github::GitHubResolver;
use gitfleet::repo::RepositoryManager;
use gitfleet::workflow::registry::ActionRegistry;
use gitfleet::workflow::{
    CancellationToken, Environment, InspectionSnapshot, OptionMap, OptionValue, RepositoryState,
};

use super::AppContext;

pub fn handle_branch_default(ctx: &AppContext, target: String, delete_old: bool) -> anyhow::Result<()> {
    let path = ctx.current_repository()?;
    let manager = RepositoryManager::new(Arc::clone(&ctx.exec));
    let resolver = GitHubResolver::new(Arc::clone(&ctx.exec));
    let fs = StdFileSystem;
    let cancel = CancellationToken::new();

    let env = Environment {
        exec: ctx.exec.as_ref(),
        repos: &manager,
        github: &resolver,
        fs: &fs,
        reporter: &ctx.reporter,
        prompter: ctx.prompter.as_ref(),
        chat: None,
        options: &ctx.options,
        cancel: &cancel,
        prompts: PromptState::new(),
    };
    let mut state = RepositoryState::new(path, InspectionSnapshot::default());

    let mut options = OptionMap::new();
    options.insert("target".to_string(), OptionValue::String(target));
    if delete_old {
        options.insert("delete_old".to_string(), OptionValue::Bool(true));
    }

    let handler = ActionRegistry::builtin().get("default-branch")?;
    handler(&env, &mut state, &options)?;
    Ok(())
}
