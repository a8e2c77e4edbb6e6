//! Task planning: turn a task definition into executable steps.
//!
//! Planning happens per repository, just before the task runs, so `${name}`
//! placeholders see every variable captured by earlier tasks.

use std::path::PathBuf;

use crate::domain::{BranchName, RemoteName};

use super::guards::Guard;
use super::registry::{ActionHandler, ActionRegistry};
use super::vars::VariableStore;
use super::{OptionMap, OptionValue, RepositoryState, SafeguardSpec, TaskDefinition, WorkflowError};

/// Actions that touch the worktree; declarative safeguards attach to these.
const FILE_TOUCHING_ACTIONS: &[&str] =
    &["write-file", "stage", "commit", "rewrite-namespace", "purge-history"];

/// One executable step: handler, resolved options, active guards.
pub struct PlannedStep {
    pub action: String,
    pub handler: ActionHandler,
    pub options: OptionMap,
    pub guards: Vec<Guard>,
}

pub struct TaskPlan {
    pub task: String,
    pub steps: Vec<PlannedStep>,
}

/// Materialize `task` for one repository.
pub fn plan_task(
    registry: &ActionRegistry,
    task: &TaskDefinition,
    state: &RepositoryState,
) -> Result<TaskPlan, WorkflowError> {
    let safeguard_guards = task
        .safeguards
        .as_ref()
        .map(|spec| guards_from_safeguards(spec))
        .transpose()?
        .unwrap_or_default();

    let mut steps = Vec::new();
    for definition in &task.actions {
        if let Some(allowed) = &task.steps
            && !allowed.iter().any(|step| step == &definition.action)
        {
            continue;
        }

        let handler = registry.get(&definition.action)?;
        let options = expand_options(&definition.options, &state.vars)?;

        let mut guards = Vec::new();
        if steps.is_empty() && task.ensure_clean {
            guards.push(Guard::CleanWorktree { ignore: Vec::new() });
        }
        if FILE_TOUCHING_ACTIONS.contains(&definition.action.as_str()) {
            guards.extend(safeguard_guards.iter().cloned());
        }

        steps.push(PlannedStep {
            action: definition.action.clone(),
            handler,
            options,
            guards,
        });
    }

    Ok(TaskPlan { task: task.name.clone(), steps })
}

/// Build the guard set a declarative safeguard block denotes. Also used by
/// the runner for the task-level pre-check.
pub fn guards_from_safeguards(spec: &SafeguardSpec) -> Result<Vec<Guard>, WorkflowError> {
    let mut guards = Vec::new();
    if spec.require_clean {
        guards.push(Guard::CleanWorktree { ignore: Vec::new() });
    }
    if let Some(branch) = &spec.branch {
        let branch = BranchName::new(branch.as_str()).map_err(|e| WorkflowError::InvalidOption {
            key: "safeguards.branch".to_string(),
            message: e.to_string(),
        })?;
        guards.push(Guard::BranchPresent { branch });
    }
    if !spec.paths.is_empty() {
        guards.push(Guard::PathsExist {
            paths: spec.paths.iter().map(PathBuf::from).collect(),
        });
    }
    Ok(guards)
}

/// Recursively substitute `${name}` placeholders in string option values.
fn expand_options(options: &OptionMap, vars: &VariableStore) -> Result<OptionMap, WorkflowError> {
    options
        .iter()
        .map(|(key, value)| Ok((key.clone(), expand_value(value, vars)?)))
        .collect()
}

fn expand_value(value: &OptionValue, vars: &VariableStore) -> Result<OptionValue, WorkflowError> {
    Ok(match value {
        OptionValue::String(text) => OptionValue::String(vars.expand(text)?),
        OptionValue::List(items) => OptionValue::List(
            items.iter().map(|item| expand_value(item, vars)).collect::<Result<_, _>>()?,
        ),
        OptionValue::Map(map) => OptionValue::Map(
            map.iter()
                .map(|(k, v)| Ok::<_, WorkflowError>((k.clone(), expand_value(v, vars)?)))
                .collect::<Result<_, _>>()?,
        ),
        other => other.clone(),
    })
}

/// Validate the remote-name option shape at plan/parse boundaries.
pub fn parse_remote_option(value: Option<String>) -> Result<Option<RemoteName>, WorkflowError> {
    value
        .map(|name| {
            RemoteName::new(name).map_err(|e| WorkflowError::InvalidOption {
                key: "remote".to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}
