//! Resolution of bound property values.
//!
//! A bound value is either a path reference (`{"path": "/user/name"}`), a
//! literal wrapper (`{"literalString": "hi"}`), or a plain value that is
//! already concrete.

use serde_json::{Map, Value};

use crate::data_model::DataModel;
use crate::pointer;

const LITERAL_KEYS: [&str; 3] = ["literalString", "literalNumber", "literalBoolean"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue<'a> {
    Path(&'a str),
    Literal(&'a Value),
    Raw(&'a Value),
}

impl<'a> BoundValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        let Value::Object(object) = value else {
            return BoundValue::Raw(value);
        };

        if let Some(Value::String(path)) = object.get("path") {
            return BoundValue::Path(path);
        }

        LITERAL_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .map(BoundValue::Literal)
            .unwrap_or(BoundValue::Raw(value))
    }
}

pub fn is_path_reference(value: &Value) -> bool {
    matches!(BoundValue::classify(value), BoundValue::Path(_))
}

/// Resolves `bound` against a surface's data model.
///
/// `None` means the path resolved to nothing; callers treat it like `null`.
pub fn resolve(bound: &Value, model: &DataModel) -> Option<Value> {
    resolve_in(bound, model.tree())
}

/// Resolves `bound` against an already materialized data tree.
pub fn resolve_in(bound: &Value, root: &Value) -> Option<Value> {
    match BoundValue::classify(bound) {
        BoundValue::Path(path) => pointer::get(root, path).cloned(),
        BoundValue::Literal(inner) | BoundValue::Raw(inner) => Some(inner.clone()),
    }
}

/// Resolves every bound value inside `value`, at any depth and inside arrays.
/// Unresolvable paths become `null`.
pub fn resolve_deep(value: &Value, model: &DataModel) -> Value {
    resolve_deep_in(value, model.tree())
}

pub fn resolve_deep_in(value: &Value, root: &Value) -> Value {
    match BoundValue::classify(value) {
        BoundValue::Path(path) => pointer::get(root, path).cloned().unwrap_or(Value::Null),
        BoundValue::Literal(inner) => inner.clone(),
        BoundValue::Raw(Value::Object(object)) => Value::Object(resolve_map_in(object, root)),
        BoundValue::Raw(Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| resolve_deep_in(item, root))
                .collect(),
        ),
        BoundValue::Raw(other) => other.clone(),
    }
}

pub fn resolve_map_in(properties: &Map<String, Value>, root: &Value) -> Map<String, Value> {
    properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve_deep_in(value, root)))
        .collect()
}
