//! Workflow execution: tasks, actions, guards, planning, and the runner.

pub mod actions;
pub mod guards;
pub mod planner;
pub mod registry;
pub mod runner;
pub mod vars;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::confirm::{PromptState, Prompter};
use crate::domain::{RemoteName, RepositoryPath};
use crate::fsys::FileSystem;
use crate::github::GitHubResolver;
use crate::llm::ChatClient;
use crate::repo::{GitError, RepositoryManager};
use crate::report::{EventCode, Reporter};
use crate::shell_exec::{GitExecutor, ShellError};
use vars::VariableStore;

/// Default and maximum size of the worker pool.
pub const DEFAULT_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

/// Cooperative cancellation shared between the CLI and the runner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Value of one action option. Deserialized from task files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<OptionValue>),
    Map(IndexMap<String, OptionValue>),
}

impl OptionValue {
    /// Scalar rendering used for `${name}` interpolation targets.
    pub fn render(&self) -> String {
        match self {
            OptionValue::Bool(v) => v.to_string(),
            OptionValue::Int(v) => v.to_string(),
            OptionValue::Float(v) => v.to_string(),
            OptionValue::String(v) => v.clone(),
            OptionValue::List(_) | OptionValue::Map(_) => String::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Float(_) => "float",
            OptionValue::String(_) => "string",
            OptionValue::List(_) => "list",
            OptionValue::Map(_) => "map",
        }
    }
}

/// Options of one action, in declaration order.
pub type OptionMap = IndexMap<String, OptionValue>;

/// Declarative task-level pre-conditions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafeguardSpec {
    #[serde(default)]
    pub require_clean: bool,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionDefinition {
    #[serde(rename = "type")]
    pub action: String,
    #[serde(default)]
    pub options: OptionMap,
}

impl ActionDefinition {
    pub fn new(action: impl Into<String>, options: OptionMap) -> Self {
        Self { action: action.into(), options }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub ensure_clean: bool,
    #[serde(default)]
    pub safeguards: Option<SafeguardSpec>,
    /// When present, only actions whose type is listed here run.
    #[serde(default)]
    pub steps: Option<Vec<String>>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

impl TaskDefinition {
    pub fn single(name: impl Into<String>, action: ActionDefinition) -> Self {
        Self {
            name: name.into(),
            ensure_clean: false,
            safeguards: None,
            steps: None,
            actions: vec![action],
        }
    }
}

/// Parsed task file: `tasks: [ { name, ensure_clean, safeguards, steps, actions } ]`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskFile {
    pub tasks: Vec<TaskDefinition>,
}

impl TaskFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read task file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("cannot parse task file {}", path.display()))
    }
}

/// Per-run knobs resolved at the CLI boundary.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub assume_yes: bool,
    pub workers: usize,
    pub remote: Option<RemoteName>,
    pub timeout: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { assume_yes: false, workers: DEFAULT_WORKERS, remote: None, timeout: None }
    }
}

impl RuntimeOptions {
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.workers == 0 {
            return Err(WorkflowError::Configuration {
                message: "worker count must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.min(MAX_WORKERS)
    }

    pub fn remote_or_origin(&self) -> RemoteName {
        self.remote.clone().unwrap_or_else(RemoteName::origin)
    }
}

/// Inspection snapshot taken when the repository enters the runner.
#[derive(Debug, Clone, Default)]
pub struct InspectionSnapshot {
    pub current_branch: Option<crate::domain::BranchName>,
    pub remote_default_branch: Option<crate::domain::BranchName>,
    pub remote_url: Option<crate::domain::RemoteUrl>,
    pub clean: bool,
}

/// State of one repository for the lifetime of its plan. Owned by the
/// runner, mutated only by action handlers through the environment.
#[derive(Debug)]
pub struct RepositoryState {
    pub path: RepositoryPath,
    pub inspection: InspectionSnapshot,
    pub vars: VariableStore,
}

impl RepositoryState {
    pub fn new(path: RepositoryPath, inspection: InspectionSnapshot) -> Self {
        Self { path, inspection, vars: VariableStore::new() }
    }

    pub fn name(&self) -> String {
        self.path.folder_name()
    }

    /// Take the inspection snapshot for `path`.
    pub fn inspect(
        manager: &RepositoryManager,
        path: RepositoryPath,
        remote: &RemoteName,
    ) -> Result<Self, GitError> {
        let current_branch = manager.current_branch(&path)?;
        let remote_url = manager.get_remote_url(&path, remote)?;
        let remote_default_branch = if remote_url.is_some() {
            manager.remote_default_branch(&path, remote)?
        } else {
            None
        };
        let clean = manager.check_clean_worktree(&path)?;
        Ok(Self::new(path, InspectionSnapshot {
            current_branch,
            remote_default_branch,
            remote_url,
            clean,
        }))
    }
}

/// Shared references handed to every action handler. Created per
/// repository; handlers must not retain references across invocations.
pub struct Environment<'a> {
    pub exec: &'a dyn GitExecutor,
    pub repos: &'a RepositoryManager,
    pub github: &'a GitHubResolver,
    pub fs: &'a dyn FileSystem,
    pub reporter: &'a Reporter,
    pub prompter: &'a dyn Prompter,
    pub chat: Option<&'a dyn ChatClient>,
    pub options: &'a RuntimeOptions,
    pub cancel: &'a CancellationToken,
    /// Apply-to-all memory, fresh per repository.
    pub prompts: PromptState,
}

impl Environment<'_> {
    /// Ask for confirmation, honoring assume-yes and apply-to-all memory.
    pub fn confirm(&self, prompt: &str) -> Result<bool, WorkflowError> {
        if self.options.assume_yes || self.prompts.auto_confirm() {
            return Ok(true);
        }
        let answer = self.prompter.confirm(prompt).map_err(WorkflowError::Io)?;
        if answer.apply_to_all {
            self.prompts.remember_all();
        }
        Ok(answer.confirmed)
    }

    pub fn remote(&self) -> RemoteName {
        self.options.remote_or_origin()
    }
}

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatality {
    /// Abort the entire invocation.
    Run,
    /// Abort the remaining tasks of the current repository.
    Repo,
    /// Abort the current action; later tasks still run.
    Action,
}

#[derive(Debug)]
pub enum WorkflowError {
    Configuration { message: String },
    DependencyMissing { name: &'static str },
    UnknownActionType { action: String },
    OptionTypeMismatch { key: String, expected: &'static str },
    MissingOption { key: String },
    InvalidOption { key: String, message: String },
    UnknownVariable { name: String },
    UnsupportedRestoreKind { name: String, kind: String },
    BranchUnresolvable,
    NoChanges,
    EmptyLlmResponse,
    NamespacePushFailed { branch: String, reason: String },
    Git(GitError),
    Shell(ShellError),
    Io(std::io::Error),
    Chat(anyhow::Error),
    Cancelled,
    /// Join of an action's own error with a restore error observed while
    /// unwinding (e.g. a failed stash pop).
    Composed { primary: Box<WorkflowError>, secondary: Box<WorkflowError> },
}

impl WorkflowError {
    pub fn fatality(&self) -> Fatality {
        match self {
            WorkflowError::Configuration { .. } => Fatality::Run,
            WorkflowError::DependencyMissing { .. } => Fatality::Repo,
            WorkflowError::Composed { primary, .. } => primary.fatality(),
            _ => Fatality::Action,
        }
    }

    /// Event code an error surfaces under when the runner reports it.
    pub fn code(&self) -> EventCode {
        match self {
            WorkflowError::Cancelled => EventCode::RunCancelled,
            _ => EventCode::ActionFail,
        }
    }

    pub fn compose(self, secondary: WorkflowError) -> WorkflowError {
        WorkflowError::Composed { primary: Box::new(self), secondary: Box::new(secondary) }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::Configuration { message } => write!(f, "configuration error: {message}"),
            WorkflowError::DependencyMissing { name } => {
                write!(f, "required collaborator missing: {name}")
            }
            WorkflowError::UnknownActionType { action } => {
                write!(f, "unknown action type {action:?}")
            }
            WorkflowError::OptionTypeMismatch { key, expected } => {
                write!(f, "option {key:?} has the wrong type, expected {expected}")
            }
            WorkflowError::MissingOption { key } => write!(f, "required option {key:?} is missing"),
            WorkflowError::InvalidOption { key, message } => {
                write!(f, "invalid option {key:?}: {message}")
            }
            WorkflowError::UnknownVariable { name } => {
                write!(f, "no captured variable named {name:?}")
            }
            WorkflowError::UnsupportedRestoreKind { name, kind } => {
                write!(f, "variable {name:?} holds a {kind} capture, which cannot be restored here")
            }
            WorkflowError::BranchUnresolvable => {
                write!(f, "no branch to switch to: no explicit branch, remote default, or configured default")
            }
            WorkflowError::NoChanges => write!(f, "nothing to describe: working tree has no changes"),
            WorkflowError::EmptyLlmResponse => write!(f, "chat client returned an empty message"),
            WorkflowError::NamespacePushFailed { branch, reason } => {
                write!(f, "failed to push rewrite branch {branch}: {reason} (local commit kept)")
            }
            WorkflowError::Git(err) => write!(f, "{err}"),
            WorkflowError::Shell(err) => write!(f, "{err}"),
            WorkflowError::Io(err) => write!(f, "{err}"),
            WorkflowError::Chat(err) => write!(f, "{err}"),
            WorkflowError::Cancelled => write!(f, "run cancelled"),
            WorkflowError::Composed { primary, secondary } => {
                write!(f, "{primary}; additionally: {secondary}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<GitError> for WorkflowError {
    fn from(err: GitError) -> Self {
        WorkflowError::Git(err)
    }
}

impl From<ShellError> for WorkflowError {
    fn from(err: ShellError) -> Self {
        WorkflowError::Shell(err)
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::Io(err)
    }
}
