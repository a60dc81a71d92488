//! Path parsing and traversal over `serde_json::Value` trees.
//!
//! Paths starting with `/` are RFC 6901 pointers. Anything else is treated as
//! legacy dot notation (`user.name.0`). The empty path addresses the whole value.

use serde_json::{Map, Value};

use crate::error::PathError;

pub fn segments(path: &str) -> Vec<String> {
    if path.is_empty() {
        return vec![];
    }

    match path.strip_prefix('/') {
        Some(pointer) => pointer.split('/').map(unescape_pointer_token).collect(),
        None => path.split('.').map(str::to_string).collect(),
    }
}

/// Builds a pointer path from raw segments, escaping `~` and `/`.
pub fn to_pointer<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens.iter().fold(String::new(), |mut out, token| {
        out.push('/');
        out.push_str(&escape_pointer_token(token.as_ref()));
        out
    })
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .iter()
        .try_fold(root, |current, token| descend(current, token))
}

/// Returns a copy of `root` with `value` written at `path`.
pub fn set(root: &Value, path: &str, value: Value) -> Result<Value, PathError> {
    let mut next = root.clone();
    set_in_place(&mut next, path, value)?;
    Ok(next)
}

/// Writes `value` at `path`, creating missing containers on the way.
///
/// A missing intermediate becomes an array when the following segment is `0`
/// and an object otherwise, so a large numeric segment is an object key.
/// Existing arrays only accept an index up to their length (append). Scalars
/// in the way are replaced.
pub fn set_in_place(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let tokens = segments(path);

    let Some((last, parents)) = tokens.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;

    for (position, token) in parents.iter().enumerate() {
        current = descend_or_create(current, token, &tokens[position + 1])?;
    }

    *slot_mut(current, last)? = value;
    Ok(())
}

fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn parse_index(token: &str, max_len: usize) -> Result<usize, PathError> {
    let index = token
        .parse::<usize>()
        .map_err(|_| PathError::InvalidIndex {
            token: token.to_string(),
        })?;

    if index > max_len {
        Err(PathError::IndexOutOfBounds {
            index,
            len: max_len,
        })
    } else {
        Ok(index)
    }
}

fn descend<'a>(value: &'a Value, token: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(token),
        Value::Array(items) => token
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    }
}

fn descend_or_create<'a>(
    value: &'a mut Value,
    token: &str,
    next: &str,
) -> Result<&'a mut Value, PathError> {
    let slot = slot_mut(value, token)?;

    if !slot.is_object() && !slot.is_array() {
        *slot = if next == "0" {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        };
    }

    Ok(slot)
}

fn slot_mut<'a>(value: &'a mut Value, token: &str) -> Result<&'a mut Value, PathError> {
    match value {
        Value::Array(items) => {
            let index = parse_index(token, items.len())?;
            if index == items.len() {
                items.push(Value::Null);
            }
            Ok(&mut items[index])
        }
        Value::Object(map) => Ok(map.entry(token.to_string()).or_insert(Value::Null)),
        scalar => {
            *scalar = Value::Object(Map::new());
            slot_mut(scalar, token)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pointer_segments_are_unescaped() {
        assert_eq!(segments("/a~1b/c~0d"), vec!["a/b", "c~d"]);
    }

    #[test]
    fn tilde_is_unescaped_after_slash() {
        assert_eq!(segments("/~01"), vec!["~1"]);
    }

    #[test]
    fn legacy_dot_notation_splits_on_dots() {
        assert_eq!(segments("user.items.0"), vec!["user", "items", "0"]);
    }

    #[test]
    fn empty_path_has_no_segments() {
        assert!(segments("").is_empty());
    }

    #[test]
    fn to_pointer_escapes_segments() {
        assert_eq!(to_pointer(&["a/b", "c~d"]), "/a~1b/c~0d");
        assert_eq!(segments(&to_pointer(&["a/b", "c~d"])), vec!["a/b", "c~d"]);
    }

    #[test]
    fn get_walks_objects_and_arrays() {
        let root = json!({"user": {"tags": ["a", "b"]}});

        assert_eq!(get(&root, "/user/tags/1"), Some(&json!("b")));
        assert_eq!(get(&root, "user.tags.0"), Some(&json!("a")));
        assert_eq!(get(&root, ""), Some(&root));
    }

    #[test]
    fn get_short_circuits_on_missing_or_null() {
        let root = json!({"user": null, "tags": ["a"]});

        assert_eq!(get(&root, "/user/name"), None);
        assert_eq!(get(&root, "/missing/deeper"), None);
        assert_eq!(get(&root, "/tags/first"), None);
        assert_eq!(get(&root, "/tags/4"), None);
    }

    #[test]
    fn set_does_not_mutate_the_original() {
        let root = json!({"user": {"name": "Ada"}});
        let next = set(&root, "/user/name", json!("Grace")).expect("set");

        assert_eq!(root["user"]["name"], "Ada");
        assert_eq!(next["user"]["name"], "Grace");
    }

    #[test]
    fn set_creates_arrays_for_numeric_next_segments() {
        let next = set(&json!({}), "/items/0/label", json!("first")).expect("set");

        assert_eq!(next, json!({"items": [{"label": "first"}]}));
    }

    #[test]
    fn set_creates_objects_for_named_next_segments() {
        let next = set(&json!({}), "/user/profile/name", json!("Ada")).expect("set");

        assert_eq!(next, json!({"user": {"profile": {"name": "Ada"}}}));
    }

    #[test]
    fn set_appends_at_the_array_length() {
        let next = set(&json!({"items": ["a"]}), "/items/1", json!("b")).expect("append");

        assert_eq!(next, json!({"items": ["a", "b"]}));
    }

    #[test]
    fn set_refuses_to_pad_existing_arrays() {
        let root = json!({"items": ["a"]});

        assert_eq!(
            set(&root, "/items/2", json!("c")),
            Err(PathError::IndexOutOfBounds { index: 2, len: 1 })
        );
        assert_eq!(
            set(&root, "/items/18446744073709551615", json!("c")),
            Err(PathError::IndexOutOfBounds {
                index: usize::MAX,
                len: 1
            })
        );
        assert_eq!(
            set(&root, "/items/name", json!("c")),
            Err(PathError::InvalidIndex {
                token: "name".to_string()
            })
        );
    }

    #[test]
    fn large_numeric_segments_under_new_containers_are_object_keys() {
        let next = set(&json!({}), "/items/10000000000/label", json!("x")).expect("set");
        assert_eq!(next, json!({"items": {"10000000000": {"label": "x"}}}));

        let mut root = json!({});
        set_in_place(&mut root, "/items/18446744073709551615", json!("y")).expect("set");
        assert_eq!(root["items"]["18446744073709551615"], "y");
    }

    #[test]
    fn set_with_empty_path_replaces_root() {
        assert_eq!(set(&json!({"a": 1}), "", json!([1, 2])), Ok(json!([1, 2])));
    }

    #[test]
    fn set_replaces_scalars_in_the_way() {
        let next = set(&json!({"user": "Ada"}), "/user/name", json!("Grace")).expect("set");

        assert_eq!(next, json!({"user": {"name": "Grace"}}));
    }
}
