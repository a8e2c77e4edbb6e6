//! Named capture variables and `${name}` expansion.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::domain::BranchName;

use super::WorkflowError;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid"));

/// What a capture records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CaptureKind {
    Branch,
    Commit,
}

/// Declarative capture request attached to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSpec {
    pub name: String,
    pub kind: CaptureKind,
    pub overwrite: bool,
}

/// One captured value; restoration dispatches on the recorded kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedValue {
    Branch(BranchName),
    Commit(String),
}

impl CapturedValue {
    pub fn kind(&self) -> CaptureKind {
        match self {
            CapturedValue::Branch(_) => CaptureKind::Branch,
            CapturedValue::Commit(_) => CaptureKind::Commit,
        }
    }

    pub fn render(&self) -> String {
        match self {
            CapturedValue::Branch(branch) => branch.as_str().to_string(),
            CapturedValue::Commit(sha) => sha.clone(),
        }
    }
}

/// Per-repository store of captured variables. Never shared across
/// repositories or workers.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: IndexMap<String, CapturedValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a capture. An existing value is kept when the spec does not
    /// allow overwriting.
    pub fn capture(&mut self, spec: &CaptureSpec, value: CapturedValue) {
        if !spec.overwrite && self.values.contains_key(&spec.name) {
            log::debug!("capture {:?} already set; keeping existing value", spec.name);
            return;
        }
        self.values.insert(spec.name.clone(), value);
    }

    pub fn get(&self, name: &str) -> Option<&CapturedValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Expand every `${name}` placeholder from the store. An unknown name
    /// is an error so typos do not silently plan empty options.
    pub fn expand(&self, input: &str) -> Result<String, WorkflowError> {
        let mut missing: Option<String> = None;
        let expanded = PLACEHOLDER_RE.replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match self.values.get(name) {
                Some(value) => value.render(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(WorkflowError::UnknownVariable { name }),
            None => Ok(expanded.into_owned()),
        }
    }
}
