//! Field addressing inside a document
//!
//! A field selector is a JSON Pointer (RFC 6901) when it begins with `/`,
//! and a plain top-level key otherwise. The write side creates missing
//! intermediate objects on demand; descending *through* a scalar or past
//! the end of an array is refused rather than guessed.

use lamina_core::{LaminaError, Result};
use serde_json::{Map, Value};

/// Resolve a field selector against a document, read-only
///
/// Returns `None` when any step of the path is absent.
pub fn project<'v>(doc: &'v Value, field: &str) -> Option<&'v Value> {
    if field.is_empty() {
        Some(doc)
    } else if field.starts_with('/') {
        doc.pointer(field)
    } else {
        doc.get(field)
    }
}

/// Replace the sub-tree a selector addresses, creating missing objects
///
/// Intermediate `null`s become objects; an array step accepts an existing
/// index, the one-past-the-end index, or `-` (append). Anything else is an
/// invalid argument: silently clobbering a scalar would hide typos.
pub fn set_field(doc: &mut Value, field: &str, new: Value) -> Result<()> {
    if field.is_empty() {
        *doc = new;
        return Ok(());
    }
    if !field.starts_with('/') {
        return set_object_key(doc, field, new);
    }

    let tokens: Vec<String> = field.split('/').skip(1).map(unescape_token).collect();
    let mut current = doc;
    for (i, token) in tokens.iter().enumerate() {
        let last = i + 1 == tokens.len();
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        match current {
            Value::Object(map) => {
                if last {
                    map.insert(token.clone(), new);
                    return Ok(());
                }
                current = map.entry(token.clone()).or_insert(Value::Null);
            }
            Value::Array(items) => {
                let index = array_index(token, items.len(), field)?;
                if index == items.len() {
                    items.push(Value::Null);
                }
                if last {
                    items[index] = new;
                    return Ok(());
                }
                current = &mut items[index];
            }
            _ => {
                return Err(LaminaError::invalid_argument(format!(
                    "field {field:?} descends through a scalar at {token:?}"
                )))
            }
        }
    }
    unreachable!("empty pointer handled above")
}

fn set_object_key(doc: &mut Value, key: &str, new: Value) -> Result<()> {
    if doc.is_null() {
        *doc = Value::Object(Map::new());
    }
    match doc {
        Value::Object(map) => {
            map.insert(key.to_string(), new);
            Ok(())
        }
        _ => Err(LaminaError::invalid_argument(format!(
            "field {key:?} addresses a key of a non-object document"
        ))),
    }
}

fn array_index(token: &str, len: usize, field: &str) -> Result<usize> {
    if token == "-" {
        return Ok(len);
    }
    match token.parse::<usize>() {
        Ok(index) if index <= len => Ok(index),
        _ => Err(LaminaError::invalid_argument(format!(
            "field {field:?} has bad array index {token:?} for length {len}"
        ))),
    }
}

/// Escape a key for use as a JSON Pointer token (`~` -> `~0`, `/` -> `~1`)
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_pointer_and_top_level() {
        let doc = json!({"a": {"b": 42}, "plain": 1});
        assert_eq!(project(&doc, "/a/b"), Some(&json!(42)));
        assert_eq!(project(&doc, "plain"), Some(&json!(1)));
        assert_eq!(project(&doc, ""), Some(&doc));
        assert_eq!(project(&doc, "/a/missing"), None);
        assert_eq!(project(&doc, "a/b"), None);
    }

    #[test]
    fn test_set_creates_missing_objects() {
        let mut doc = json!({});
        set_field(&mut doc, "/a/b/c", json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_whole_document() {
        let mut doc = json!({"old": true});
        set_field(&mut doc, "", json!([1])).unwrap();
        assert_eq!(doc, json!([1]));
    }

    #[test]
    fn test_set_array_index_and_append() {
        let mut doc = json!({"xs": [10, 20]});
        set_field(&mut doc, "/xs/1", json!(99)).unwrap();
        set_field(&mut doc, "/xs/-", json!(30)).unwrap();
        set_field(&mut doc, "/xs/3", json!(40)).unwrap();
        assert_eq!(doc, json!({"xs": [10, 99, 30, 40]}));

        let err = set_field(&mut doc, "/xs/9", json!(0)).unwrap_err();
        assert_eq!(err.kind(), lamina_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_set_refuses_to_clobber_scalars() {
        let mut doc = json!({"a": 5});
        assert!(set_field(&mut doc, "/a/b", json!(1)).is_err());
        let mut scalar = json!(7);
        assert!(set_field(&mut scalar, "key", json!(1)).is_err());
    }

    #[test]
    fn test_pointer_escaping() {
        let mut doc = json!({});
        set_field(&mut doc, "/a~1b/c~0d", json!(1)).unwrap();
        assert_eq!(doc, json!({"a/b": {"c~d": 1}}));
        assert_eq!(project(&doc, "/a~1b/c~0d"), Some(&json!(1)));
        assert_eq!(escape_token("a/b~c"), "a~1b~0c");
    }
}
