//! Action registry and typed option accessors.
//!
//! The registry is initialized once before the runner starts and is
//! immutable during execution; there is no dynamic loading.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use super::{Environment, OptionMap, OptionValue, RepositoryState, WorkflowError};

/// An action handler: a pure consumer of the environment, the repository
/// state, and its option map.
pub type ActionHandler =
    fn(&Environment<'_>, &mut RepositoryState, &OptionMap) -> Result<(), WorkflowError>;

pub struct ActionRegistry {
    handlers: BTreeMap<&'static str, ActionHandler>,
}

static BUILTIN: Lazy<ActionRegistry> = Lazy::new(|| {
    let mut registry = ActionRegistry { handlers: BTreeMap::new() };
    super::actions::register_builtins(&mut registry);
    registry
});

impl ActionRegistry {
    /// The process-wide registry of built-in actions.
    pub fn builtin() -> &'static ActionRegistry {
        &BUILTIN
    }

    pub fn register(&mut self, name: &'static str, handler: ActionHandler) {
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Result<ActionHandler, WorkflowError> {
        self.handlers
            .get(name)
            .copied()
            .ok_or_else(|| WorkflowError::UnknownActionType { action: name.to_string() })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

/// `Some(string)` when present, `None` when absent, error on wrong shape.
pub fn string_option(options: &OptionMap, key: &str) -> Result<Option<String>, WorkflowError> {
    match options.get(key) {
        None => Ok(None),
        Some(OptionValue::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(WorkflowError::OptionTypeMismatch { key: key.to_string(), expected: "string" }),
    }
}

pub fn required_string_option(options: &OptionMap, key: &str) -> Result<String, WorkflowError> {
    string_option(options, key)?.ok_or_else(|| WorkflowError::MissingOption { key: key.to_string() })
}

pub fn bool_option(options: &OptionMap, key: &str, default: bool) -> Result<bool, WorkflowError> {
    match options.get(key) {
        None => Ok(default),
        Some(OptionValue::Bool(value)) => Ok(*value),
        Some(_) => Err(WorkflowError::OptionTypeMismatch { key: key.to_string(), expected: "bool" }),
    }
}

pub fn int_option(options: &OptionMap, key: &str) -> Result<Option<i64>, WorkflowError> {
    match options.get(key) {
        None => Ok(None),
        Some(OptionValue::Int(value)) => Ok(Some(*value)),
        Some(_) => Err(WorkflowError::OptionTypeMismatch { key: key.to_string(), expected: "int" }),
    }
}

/// Float; an int is accepted and widened.
pub fn float_option(options: &OptionMap, key: &str) -> Result<Option<f64>, WorkflowError> {
    match options.get(key) {
        None => Ok(None),
        Some(OptionValue::Float(value)) => Ok(Some(*value)),
        Some(OptionValue::Int(value)) => Ok(Some(*value as f64)),
        Some(_) => Err(WorkflowError::OptionTypeMismatch { key: key.to_string(), expected: "float" }),
    }
}

/// String list; a bare string is accepted as a one-element list. Missing is
/// an empty list.
pub fn string_list_option(options: &OptionMap, key: &str) -> Result<Vec<String>, WorkflowError> {
    match options.get(key) {
        None => Ok(Vec::new()),
        Some(OptionValue::String(value)) => Ok(vec![value.clone()]),
        Some(OptionValue::List(items)) => items
            .iter()
            .map(|item| match item {
                OptionValue::String(value) => Ok(value.clone()),
                _ => Err(WorkflowError::OptionTypeMismatch {
                    key: key.to_string(),
                    expected: "list of strings",
                }),
            })
            .collect(),
        Some(_) => Err(WorkflowError::OptionTypeMismatch {
            key: key.to_string(),
            expected: "list of strings",
        }),
    }
}

/// Nested option map, e.g. a `capture` block.
pub fn map_option<'a>(
    options: &'a OptionMap,
    key: &str,
) -> Result<Option<&'a OptionMap>, WorkflowError> {
    match options.get(key) {
        None => Ok(None),
        Some(OptionValue::Map(map)) => Ok(Some(map)),
        Some(_) => Err(WorkflowError::OptionTypeMismatch { key: key.to_string(), expected: "map" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn sample() -> OptionMap {
        indexmap! {
            "branch".to_string() => OptionValue::String("main".to_string()),
            "refresh".to_string() => OptionValue::Bool(true),
            "limit".to_string() => OptionValue::Int(100),
            "paths".to_string() => OptionValue::List(vec![
                OptionValue::String("go.mod".to_string()),
                OptionValue::String("main.go".to_string()),
            ]),
        }
    }

    #[test]
    fn typed_accessors_read_matching_shapes() {
        let options = sample();
        assert_eq!(string_option(&options, "branch").unwrap().as_deref(), Some("main"));
        assert!(bool_option(&options, "refresh", false).unwrap());
        assert_eq!(int_option(&options, "limit").unwrap(), Some(100));
        assert_eq!(string_list_option(&options, "paths").unwrap(), vec!["go.mod", "main.go"]);
    }

    #[test]
    fn absent_keys_fall_back() {
        let options = sample();
        assert_eq!(string_option(&options, "missing").unwrap(), None);
        assert!(!bool_option(&options, "missing", false).unwrap());
        assert!(bool_option(&options, "missing", true).unwrap());
        assert!(string_list_option(&options, "missing").unwrap().is_empty());
    }

    #[test]
    fn wrong_shapes_are_type_mismatches() {
        let options = sample();
        assert!(matches!(
            string_option(&options, "refresh"),
            Err(WorkflowError::OptionTypeMismatch { .. })
        ));
        assert!(matches!(
            bool_option(&options, "branch", false),
            Err(WorkflowError::OptionTypeMismatch { .. })
        ));
        assert!(matches!(
            int_option(&options, "paths"),
            Err(WorkflowError::OptionTypeMismatch { .. })
        ));
    }

    #[test]
    fn missing_required_option() {
        let options = sample();
        assert!(matches!(
            required_string_option(&options, "absent"),
            Err(WorkflowError::MissingOption { .. })
        ));
    }

    #[test]
    fn builtin_registry_rejects_unknown_types() {
        let registry = ActionRegistry::builtin();
        assert!(matches!(
            registry.get("definitely-not-an-action"),
            Err(WorkflowError::UnknownActionType { .. })
        ));
        assert!(registry.get("switch-branch").is_ok());
    }
}
