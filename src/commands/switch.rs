//! `gf cd` — switch branches across the fleet.

use gitfleet::workflow::{ActionDefinition, CancellationToken, OptionMap, OptionValue, TaskDefinition};

use super::AppContext;

pub fn handle_cd(
    ctx: &AppContext,
    branch: Option<String>,
    stash: bool,
    commit: bool,
    require_clean: Option<bool>,
) -> anyhow::Result<()> {
    let mut options = OptionMap::new();
    if let Some(branch) = branch {
        options.insert("branch".to_string(), OptionValue::String(branch));
    }
    if stash {
        options.insert("stash".to_string(), OptionValue::Bool(true));
    }
    if commit {
        options.insert("commit".to_string(), OptionValue::Bool(true));
    }
    if let Some(require_clean) = require_clean {
        options.insert("require_clean".to_string(), OptionValue::Bool(require_clean));
    }

    let task = TaskDefinition::single(
        "switch-branch",
        ActionDefinition::new("switch-branch", options),
    );
    let runner = ctx.runner();
    runner.run(&CancellationToken::new(), &ctx.roots, &[task], &ctx.options)?;
    Ok(())
}
