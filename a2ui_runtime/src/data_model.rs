//! Per-surface data model.
//!
//! Values are stored under the exact path string computed at write time
//! (`prefix/key`). Writing a path replaces whatever was there; nothing is
//! merged. Binding resolution reads through [`DataModel::tree`], which folds
//! the stored entries into one nested value in write order.

use std::cell::OnceCell;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::pointer;
use crate::protocol::DataEntry;

#[derive(Debug, Clone, Default)]
pub struct DataModel {
    entries: IndexMap<String, Value>,
    tree: OnceCell<Value>,
}

impl PartialEq for DataModel {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_update(&mut self, path: Option<&str>, contents: &[DataEntry]) {
        for entry in contents {
            self.insert(storage_path(path, &entry.key), entry.value());
        }
    }

    /// Exact lookup of a stored path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    /// Stores `value` under `path`, replacing any previous value.
    pub fn insert(&mut self, path: String, value: Value) {
        // Re-inserting moves the key to the end so `tree` sees writes in order.
        self.entries.shift_remove(&path);
        self.entries.insert(path, value);
        self.tree.take();
    }

    /// Writes a client-side value. Returns `false` if nothing was written.
    ///
    /// An exact stored path is replaced. Otherwise, when a stored path is a
    /// segment prefix of `path`, the value is written inside that entry.
    /// Failing both, `path` becomes a new entry. The empty path would replace
    /// the whole model and is refused.
    pub fn set_local(&mut self, path: &str, value: Value) -> bool {
        let target = pointer::segments(path);
        if target.is_empty() {
            debug!("refusing local write to the data model root");
            return false;
        }

        if self.entries.contains_key(path) {
            self.insert(path.to_string(), value);
            return true;
        }

        let owner = self
            .entries
            .keys()
            .map(|key| (key, pointer::segments(key)))
            .filter(|(_, owned)| {
                !owned.is_empty() && owned.len() < target.len() && target.starts_with(owned)
            })
            .max_by_key(|(_, owned)| owned.len())
            .map(|(key, owned)| (key.clone(), owned.len()));

        let Some((key, depth)) = owner else {
            self.insert(path.to_string(), value);
            return true;
        };

        let relative = pointer::to_pointer(&target[depth..]);
        let current = self.entries.get(&key).cloned().unwrap_or(Value::Null);
        match pointer::set(&current, &relative, value) {
            Ok(next) => {
                self.insert(key, next);
                true
            }
            Err(err) => {
                debug!(
                    path,
                    owner = %key,
                    error = %err,
                    "local write does not fit the stored value"
                );
                false
            }
        }
    }

    /// The stored entries folded into a single nested value.
    ///
    /// Entries that do not fit what earlier entries built (an array index past
    /// the end, say) are left out, as is an entry stored at the empty path.
    pub fn tree(&self) -> &Value {
        self.tree.get_or_init(|| {
            let mut root = Value::Object(Map::new());
            for (path, value) in &self.entries {
                if path.is_empty() {
                    warn!("data entry with an empty path left out of the data tree");
                    continue;
                }
                if let Err(err) = pointer::set_in_place(&mut root, path, value.clone()) {
                    warn!(path = %path, error = %err, "data entry left out of the data tree");
                }
            }
            root
        })
    }

    /// Resolves a binding path against [`DataModel::tree`].
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        pointer::get(self.tree(), path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }
}

/// Joins an optional update prefix and an entry key into a storage path.
pub fn storage_path(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        None | Some("") => key.to_string(),
        Some(prefix) => format!("{}/{key}", prefix.trim_end_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string_entry(key: &str, value: &str) -> DataEntry {
        DataEntry {
            key: key.to_string(),
            value_string: Some(value.to_string()),
            ..DataEntry::default()
        }
    }

    #[test]
    fn prefixed_write_is_readable_by_exact_path() {
        let mut model = DataModel::new();
        model.apply_update(Some("/p"), &[string_entry("a", "v")]);

        assert_eq!(model.get("/p/a"), Some(&json!("v")));
        assert_eq!(model.lookup("/p/a"), Some(&json!("v")));
    }

    #[test]
    fn nested_map_is_stored_as_one_object() {
        let mut model = DataModel::new();
        model.apply_update(
            Some(""),
            &[DataEntry {
                key: "u".to_string(),
                value_map: Some(vec![string_entry("n", "Jo")]),
                ..DataEntry::default()
            }],
        );

        assert_eq!(model.len(), 1);
        assert_eq!(model.get("u"), Some(&json!({"n": "Jo"})));
        assert_eq!(model.get("u/n"), None);
        assert_eq!(model.lookup("/u/n"), Some(&json!("Jo")));
    }

    #[test]
    fn rewriting_a_path_replaces_instead_of_merging() {
        let mut model = DataModel::new();
        model.insert("user".to_string(), json!({"name": "Ada", "age": 36}));
        model.insert("user".to_string(), json!({"name": "Grace"}));

        assert_eq!(model.get("user"), Some(&json!({"name": "Grace"})));
        assert_eq!(model.lookup("/user/age"), None);
    }

    #[test]
    fn tree_follows_write_order() {
        let mut model = DataModel::new();
        model.insert("/p/a".to_string(), json!("stale"));
        model.insert("/p".to_string(), json!({"b": 1}));

        assert_eq!(model.lookup("/p/a"), None);
        assert_eq!(model.lookup("/p/b"), Some(&json!(1)));

        model.insert("/p/a".to_string(), json!("fresh"));
        assert_eq!(model.lookup("/p"), Some(&json!({"a": "fresh", "b": 1})));
    }

    #[test]
    fn storage_path_joins_prefix_and_key() {
        assert_eq!(storage_path(None, "count"), "count");
        assert_eq!(storage_path(Some(""), "count"), "count");
        assert_eq!(storage_path(Some("/p"), "a"), "/p/a");
        assert_eq!(storage_path(Some("/p/"), "a"), "/p/a");
        assert_eq!(storage_path(Some("/"), "a"), "/a");
    }

    #[test]
    fn set_local_replaces_exact_entry() {
        let mut model = DataModel::new();
        model.insert("/form/name".to_string(), json!("Ada"));
        model.set_local("/form/name", json!("Grace"));

        assert_eq!(model.len(), 1);
        assert_eq!(model.get("/form/name"), Some(&json!("Grace")));
    }

    #[test]
    fn set_local_writes_inside_owning_entry() {
        let mut model = DataModel::new();
        model.insert("/form".to_string(), json!({"name": "Ada", "tags": ["x"]}));
        model.set_local("/form/tags/1", json!("y"));

        assert_eq!(model.len(), 1);
        assert_eq!(
            model.get("/form"),
            Some(&json!({"name": "Ada", "tags": ["x", "y"]}))
        );
    }

    #[test]
    fn set_local_creates_entry_when_unowned() {
        let mut model = DataModel::new();
        model.set_local("/draft", json!(true));

        assert_eq!(model.get("/draft"), Some(&json!(true)));
        assert_eq!(model.lookup("/draft"), Some(&json!(true)));
    }

    #[test]
    fn oversized_index_keys_do_not_break_the_tree() {
        let mut model = DataModel::new();
        model.insert("other".to_string(), json!("kept"));
        model.apply_update(Some("/items"), &[string_entry("18446744073709551615", "x")]);

        assert_eq!(model.lookup("/other"), Some(&json!("kept")));
        assert_eq!(
            model.lookup("/items/18446744073709551615"),
            Some(&json!("x"))
        );
    }

    #[test]
    fn entry_past_the_end_of_an_array_is_left_out() {
        let mut model = DataModel::new();
        model.insert("/list".to_string(), json!(["a"]));
        model.insert("/list/10000000000".to_string(), json!("far"));
        model.insert("/name".to_string(), json!("Ada"));

        assert_eq!(model.lookup("/list"), Some(&json!(["a"])));
        assert_eq!(model.lookup("/name"), Some(&json!("Ada")));
    }

    #[test]
    fn set_local_rejects_writes_that_do_not_fit() {
        let mut model = DataModel::new();
        model.insert("/list".to_string(), json!(["a"]));

        assert!(!model.set_local("/list/99999999999", json!("far")));
        assert!(model.set_local("/list/1", json!("b")));
        assert_eq!(model.get("/list"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn set_local_refuses_the_empty_path() {
        let mut model = DataModel::new();
        model.insert("/name".to_string(), json!("Ada"));

        assert!(!model.set_local("", json!("everything")));
        assert_eq!(model.len(), 1);
        assert_eq!(model.lookup("/name"), Some(&json!("Ada")));
    }

    #[test]
    fn empty_data_key_does_not_replace_the_tree() {
        let mut model = DataModel::new();
        model.apply_update(None, &[string_entry("name", "Ada"), string_entry("", "root")]);

        assert_eq!(model.lookup("/name"), Some(&json!("Ada")));
    }
}
