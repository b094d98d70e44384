#![forbid(unsafe_code)]

use serde_json::Value;
use sha2::Digest;
use std::fmt::Write as _;

pub const CONTENT_HASH_PREFIX: &str = "hash_";
const HASH_HEX_LEN: usize = 20;

/// Canonical JSON: object keys sorted by codepoint, no whitespace, strings as
/// emitted by serde_json. `serde_json::Value` keeps objects in a `BTreeMap`
/// (the `preserve_order` feature must stay off), so compact serialization is
/// already canonical.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.as_slice() {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Truncated digest over the canonical serialization of `value`. Every id in
/// the system (`hash_`, `op_`, `cs_`, `op_promote_`) is a prefix over this.
pub fn digest20(value: &Value) -> String {
    let mut hex = sha256_hex(canonical_json(value).as_bytes());
    hex.truncate(HASH_HEX_LEN);
    hex
}

/// `hash_<20 hex>` over an arbitrary JSON value.
pub fn content_hash_value(value: &Value) -> String {
    format!("{CONTENT_HASH_PREFIX}{}", digest20(value))
}

/// `hash_<20 hex>` over a raw string, hashed as its JSON serialization.
pub fn content_hash_text(text: &str) -> String {
    content_hash_value(&Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":null}}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":{"y":null,"z":true},"b":1}"#);
    }

    #[test]
    fn content_hash_shape() {
        let hash = content_hash_text("hi\n");
        assert!(hash.starts_with(CONTENT_HASH_PREFIX));
        assert_eq!(hash.len(), CONTENT_HASH_PREFIX.len() + 20);
        assert!(
            hash[CONTENT_HASH_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        );
    }

    #[test]
    fn hash_is_deterministic_across_key_order() {
        let left: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(content_hash_value(&left), content_hash_value(&right));
    }

    #[test]
    fn string_hash_matches_value_hash() {
        assert_eq!(content_hash_text("x"), content_hash_value(&json!("x")));
        assert_ne!(content_hash_text("1"), content_hash_value(&json!(1)));
    }
}
