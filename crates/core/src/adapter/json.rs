#![forbid(unsafe_code)]

use crate::hash::{canonical_json, content_hash_value};
use crate::symbol::SymbolId;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Per-top-level-key edit between two versions of a JSON file.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonEdit {
    pub key: String,
    pub before_exists: bool,
    pub after_exists: bool,
    pub before_value: Option<Value>,
    pub after_value: Option<Value>,
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

pub fn symbol_hashes(path: &str, text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(object) = parse_object(text) else {
        return out;
    };
    for (key, value) in &object {
        out.insert(
            SymbolId::json_key(path, key).to_string(),
            content_hash_value(value),
        );
    }
    out
}

/// `None` when either side is not a JSON object. Keys whose canonical
/// serializations are equal are skipped; changed/new keys come first in key
/// order, then keys that only exist on the before side.
pub fn diff(before: &str, after: &str) -> Option<Vec<JsonEdit>> {
    let before_object = parse_object(before)?;
    let after_object = parse_object(after)?;

    let mut edits = Vec::new();
    for (key, after_value) in &after_object {
        match before_object.get(key) {
            Some(before_value) if canonical_json(before_value) == canonical_json(after_value) => {}
            Some(before_value) => edits.push(JsonEdit {
                key: key.clone(),
                before_exists: true,
                after_exists: true,
                before_value: Some(before_value.clone()),
                after_value: Some(after_value.clone()),
            }),
            None => edits.push(JsonEdit {
                key: key.clone(),
                before_exists: false,
                after_exists: true,
                before_value: None,
                after_value: Some(after_value.clone()),
            }),
        }
    }
    for (key, before_value) in &before_object {
        if !after_object.contains_key(key) {
            edits.push(JsonEdit {
                key: key.clone(),
                before_exists: true,
                after_exists: false,
                before_value: Some(before_value.clone()),
                after_value: None,
            });
        }
    }
    Some(edits)
}

/// Sorted keys, two-space indent, trailing newline. The serde_json map is a
/// BTreeMap, so pretty-printing already emits keys in codepoint order.
fn serialize_object(object: &Map<String, Value>) -> String {
    let value = Value::Object(object.clone());
    let mut out = serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string());
    out.push('\n');
    out
}

/// A current text that is missing or not a JSON object starts from `{}`, so
/// the first `json_set_key` against a path creates the file.
pub fn apply_set_key(current: &str, key: &str, value: &Value) -> String {
    let mut object = parse_object(current).unwrap_or_default();
    object.insert(key.to_string(), value.clone());
    serialize_object(&object)
}

/// Unparseable current text is returned unchanged; deleting an absent key
/// still re-serializes canonically.
pub fn apply_delete_key(current: &str, key: &str) -> String {
    let Some(mut object) = parse_object(current) else {
        return current.to_string();
    };
    object.remove(key);
    serialize_object(&object)
}

pub fn top_level_value(text: &str, key: &str) -> Option<Value> {
    parse_object(text)?.get(key).cloned()
}
