//! Peripheral variables as they travel in RPCs and stored devices, and the
//! change sets produced by migrating them.
//!
//! A migration runs on the flat [`VariableState`] view. [`change_set`]
//! compares the result against the original variables and reports only what
//! moved, so callers leave untouched variables (and their extra fields)
//! exactly as they were.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use verchain::{
    Direction, MigrateError, PeripheralCatalog, PeripheralContext, Record, VariableState, Version,
};

/// One peripheral variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub externally_settable: bool,
    /// Fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Record,
}

impl Variable {
    /// A variable created by a migration.
    pub fn created(name: &str, value: Option<String>, timestamp: Option<i64>) -> Self {
        Self {
            name: name.to_owned(),
            value,
            timestamp,
            externally_settable: true,
            extra: Record::new(),
        }
    }
}

/// A variable entry in a "modified variables" list. `variable` is `None`
/// for a deleted variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedVariable {
    pub variable_name: String,
    #[serde(default)]
    pub variable: Option<Variable>,
    #[serde(flatten)]
    pub extra: Record,
}

/// Variable name to variable; `None` marks a deleted variable.
pub type VariableMap = BTreeMap<String, Option<Variable>>;

/// Variable name to its new variable, or `None` if the migration removed it.
/// Names absent from the set were not touched.
pub type ChangeSet = BTreeMap<String, Option<Variable>>;

/// Flatten variables into the value/timestamp maps hooks operate on.
pub fn to_state(variables: &VariableMap) -> VariableState {
    let mut state = VariableState::new();
    for (name, variable) in variables {
        let (value, timestamp) = match variable {
            Some(v) => (v.value.clone(), v.timestamp),
            None => (None, None),
        };
        state.set(name, value, timestamp);
    }
    state
}

/// What changed between `before` and the migrated `after`.
///
/// Changed variables keep their extra fields; deleted variables that the
/// migration gave a value, and brand new variables, get
/// [`Variable::created`] defaults.
pub fn change_set(before: &VariableMap, after: &VariableState) -> ChangeSet {
    let mut changes = ChangeSet::new();

    for (name, new_value) in &after.variables {
        let new_timestamp = after.timestamp(name);
        match before.get(name) {
            Some(Some(old)) => {
                if *new_value != old.value || new_timestamp != old.timestamp {
                    let mut updated = old.clone();
                    updated.value = new_value.clone();
                    updated.timestamp = new_timestamp;
                    changes.insert(name.clone(), Some(updated));
                }
            }
            Some(None) => {
                if new_value.is_some() || new_timestamp.is_some() {
                    changes.insert(
                        name.clone(),
                        Some(Variable::created(name, new_value.clone(), new_timestamp)),
                    );
                }
            }
            None => {
                changes.insert(
                    name.clone(),
                    Some(Variable::created(name, new_value.clone(), new_timestamp)),
                );
            }
        }
    }

    for name in before.keys() {
        if !after.variables.contains_key(name) {
            changes.insert(name.clone(), None);
        }
    }

    changes
}

/// Run the peripheral hook governing `peripheral` at `version` over
/// `variables` and report what changed.
pub fn apply_migrations(
    catalog: &PeripheralCatalog,
    peripheral: &str,
    version: &Version,
    direction: Direction,
    variables: &VariableMap,
    ctx: &PeripheralContext,
) -> Result<ChangeSet, MigrateError> {
    let migrated = catalog.step(peripheral, version, direction, to_state(variables), ctx)?;
    Ok(change_set(variables, &migrated))
}

/// Merge `changes` into a variable map: changed entries are replaced,
/// removed ones dropped, new ones added, the rest kept as is.
pub fn update_variables_map(variables: VariableMap, changes: &ChangeSet) -> VariableMap {
    let mut merged = VariableMap::new();
    for (name, variable) in variables {
        match changes.get(&name) {
            Some(Some(changed)) => {
                merged.insert(name, Some(changed.clone()));
            }
            Some(None) => {}
            None => {
                merged.insert(name, variable);
            }
        }
    }
    for (name, change) in changes {
        if let Some(added) = change {
            merged.entry(name.clone()).or_insert_with(|| Some(added.clone()));
        }
    }
    merged
}

/// Merge `changes` into a modified-variables list, keeping list order for
/// existing entries and appending new ones.
pub fn update_modified_variables(
    modified: Vec<ModifiedVariable>,
    changes: &ChangeSet,
) -> Vec<ModifiedVariable> {
    let existing: BTreeSet<String> = modified.iter().map(|m| m.variable_name.clone()).collect();

    let mut merged: Vec<ModifiedVariable> = modified
        .into_iter()
        .filter_map(|mut entry| match changes.get(&entry.variable_name) {
            Some(Some(changed)) => {
                entry.variable = Some(changed.clone());
                Some(entry)
            }
            Some(None) => None,
            None => Some(entry),
        })
        .collect();

    merged.extend(changes.iter().filter(|(name, _)| !existing.contains(*name)).filter_map(
        |(name, change)| {
            change.as_ref().map(|variable| ModifiedVariable {
                variable_name: name.clone(),
                variable: Some(variable.clone()),
                extra: Record::new(),
            })
        },
    ));
    merged
}

/// Index a modified-variables list by name.
pub fn modified_to_map(modified: &[ModifiedVariable]) -> VariableMap {
    modified
        .iter()
        .map(|m| (m.variable_name.clone(), m.variable.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(name: &str, value: &str, ts: i64) -> Variable {
        Variable {
            name: name.into(),
            value: Some(value.into()),
            timestamp: Some(ts),
            externally_settable: false,
            extra: json!({"owner": "hub"}).as_object().cloned().unwrap(),
        }
    }

    fn map(entries: Vec<(&str, Option<Variable>)>) -> VariableMap {
        entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn unchanged_state_has_no_changes() {
        let before = map(vec![("a", Some(var("a", "1", 10))), ("gone", None)]);
        assert!(change_set(&before, &to_state(&before)).is_empty());
    }

    #[test]
    fn modified_variable_keeps_extra_fields() {
        let before = map(vec![("a", Some(var("a", "1", 10)))]);
        let after = to_state(&before).with("a", Some("2"), Some(20));
        let changes = change_set(&before, &after);
        let changed = changes["a"].as_ref().unwrap();
        assert_eq!(changed.value.as_deref(), Some("2"));
        assert_eq!(changed.timestamp, Some(20));
        assert_eq!(changed.extra["owner"], "hub");
        assert!(!changed.externally_settable);
    }

    #[test]
    fn added_and_removed_variables() {
        let before = map(vec![("a", Some(var("a", "1", 10))), ("b", Some(var("b", "x", 5)))]);
        let mut after = to_state(&before);
        after.remove("b");
        after.set("c", Some("new".into()), Some(7));

        let changes = change_set(&before, &after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes["b"], None);
        let added = changes["c"].as_ref().unwrap();
        assert!(added.externally_settable);
        assert_eq!(added.value.as_deref(), Some("new"));
    }

    #[test]
    fn revived_deleted_variable_gets_defaults() {
        let before = map(vec![("a", None)]);
        let after = VariableState::new().with("a", Some("on"), None);
        let changed = change_set(&before, &after)["a"].clone().unwrap();
        assert_eq!(changed, Variable::created("a", Some("on".into()), None));
    }

    #[test]
    fn merge_into_variables_map() {
        let variables = map(vec![
            ("keep", Some(var("keep", "1", 1))),
            ("change", Some(var("change", "1", 1))),
            ("drop", Some(var("drop", "1", 1))),
        ]);
        let changes: ChangeSet = [
            ("change".to_owned(), Some(var("change", "2", 2))),
            ("drop".to_owned(), None),
            ("add".to_owned(), Some(Variable::created("add", Some("3".into()), None))),
            ("never_there".to_owned(), None),
        ]
        .into_iter()
        .collect();

        let merged = update_variables_map(variables, &changes);
        assert_eq!(
            merged.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["add", "change", "keep"]
        );
        assert_eq!(merged["change"].as_ref().unwrap().value.as_deref(), Some("2"));
        assert_eq!(merged["keep"].as_ref().unwrap().value.as_deref(), Some("1"));
    }

    #[test]
    fn merge_into_modified_variables() {
        let modified = vec![
            ModifiedVariable {
                variable_name: "z".into(),
                variable: Some(var("z", "1", 1)),
                extra: Record::new(),
            },
            ModifiedVariable {
                variable_name: "drop".into(),
                variable: Some(var("drop", "1", 1)),
                extra: Record::new(),
            },
        ];
        let changes: ChangeSet = [
            ("drop".to_owned(), None),
            ("new".to_owned(), Some(Variable::created("new", Some("x".into()), None))),
        ]
        .into_iter()
        .collect();

        let merged = update_modified_variables(modified, &changes);
        let names: Vec<_> = merged.iter().map(|m| m.variable_name.as_str()).collect();
        assert_eq!(names, vec!["z", "new"]);
    }

    #[test]
    fn variable_round_trips_unknown_fields() {
        let raw = json!({"name": "a", "value": "1", "timestamp": 3, "owner": "hub"});
        let parsed: Variable = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.extra["owner"], "hub");
        let mut expected = raw;
        expected["externally_settable"] = json!(false);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), expected);
    }
}
