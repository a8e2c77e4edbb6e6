//! `gf workflow run` — execute a YAML task file.

use std::path::Path;

use gitfleet::workflow::{CancellationToken, TaskFile};

use super::AppContext;

pub fn handle_workflow_run(ctx: &AppContext, file: &Path) -> anyhow::Result<()> {
    let task_file = TaskFile::load(file)?;
    if task_file.tasks.is_empty() {
        anyhow::bail!("task file {} declares no tasks", file.display());
    }
    let runner = ctx.runner();
    runner.run(&CancellationToken::new(), &ctx.roots, &task_file.tasks, &ctx.options)?;
    Ok(())
}
