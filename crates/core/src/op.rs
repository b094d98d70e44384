#![forbid(unsafe_code)]

use crate::hash::digest20;
use crate::symbol::{SymbolId, SymbolKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const OP_ID_PREFIX: &str = "op_";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub symbol_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    SymbolExists,
    SignatureHash { value: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectKind {
    UpsertFile {
        path: String,
        content: String,
    },
    DeleteFile {
        path: String,
    },
    JsonSetKey {
        path: String,
        key: String,
        value: Value,
    },
    JsonDeleteKey {
        path: String,
        key: String,
    },
    PythonReplaceSymbol {
        path: String,
        symbol_kind: PySymbolKind,
        symbol_name: String,
        before_content: String,
        after_content: String,
    },
    PythonInsertSymbol {
        path: String,
        symbol_kind: PySymbolKind,
        symbol_name: String,
        after_content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insert_after_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insert_before_key: Option<String>,
    },
    PythonDeleteSymbol {
        path: String,
        symbol_kind: PySymbolKind,
        symbol_name: String,
        before_content: String,
    },
    /// Legacy whole-document replacement; the file is resolved through
    /// `target.path_hint`.
    ReplaceBody {
        after_content: String,
    },
    #[serde(other)]
    Unknown,
}

/// Serialized form of [`SymbolKind`] inside effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PySymbolKind {
    Def,
    Class,
}

impl From<PySymbolKind> for SymbolKind {
    fn from(value: PySymbolKind) -> Self {
        match value {
            PySymbolKind::Def => SymbolKind::Def,
            PySymbolKind::Class => SymbolKind::Class,
        }
    }
}

impl From<SymbolKind> for PySymbolKind {
    fn from(value: SymbolKind) -> Self {
        match value {
            SymbolKind::Def => PySymbolKind::Def,
            SymbolKind::Class => PySymbolKind::Class,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    #[serde(flatten)]
    pub kind: EffectKind,
    /// Declared post-effect hash per written symbol; `null` marks deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_hashes: Option<BTreeMap<String, Option<String>>>,
    /// Legacy single-symbol hash declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_hash: Option<String>,
}

impl Effect {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            symbol_hashes: None,
            after_hash: None,
        }
    }

    /// Path the effect touches, falling back to the op's `path_hint` for the
    /// legacy `replace_body` kind.
    pub fn path<'a>(&'a self, path_hint: Option<&'a str>) -> Option<&'a str> {
        match &self.kind {
            EffectKind::UpsertFile { path, .. }
            | EffectKind::DeleteFile { path }
            | EffectKind::JsonSetKey { path, .. }
            | EffectKind::JsonDeleteKey { path, .. }
            | EffectKind::PythonReplaceSymbol { path, .. }
            | EffectKind::PythonInsertSymbol { path, .. }
            | EffectKind::PythonDeleteSymbol { path, .. } => Some(path),
            EffectKind::ReplaceBody { .. } => path_hint,
            EffectKind::Unknown => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub parents: Vec<String>,
    pub target: Target,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub resolves: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_order: Option<u64>,
}

impl Operation {
    /// Content-addressed id over every field except `id`, `accepted_at` and
    /// `canonical_order`. Two ops with identical contents are the same op.
    pub fn derive_id(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(object) = value.as_object_mut() {
            object.remove("id");
            object.remove("accepted_at");
            object.remove("canonical_order");
        }
        format!("{OP_ID_PREFIX}{}", digest20(&value))
    }

    pub fn author(&self) -> Option<&str> {
        self.metadata.get("author").and_then(Value::as_str)
    }

    pub fn intent(&self) -> Option<&str> {
        self.metadata.get("intent").and_then(Value::as_str)
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.metadata.get("timestamp").and_then(Value::as_i64)
    }

    pub fn source_op_id(&self) -> Option<&str> {
        self.metadata.get("source_op_id").and_then(Value::as_str)
    }

    /// Shape validation. Does not look at any engine state.
    pub fn validate(&self) -> Result<(), String> {
        if self.state.trim().is_empty() {
            return Err("op state must not be empty".to_string());
        }
        SymbolId::parse(&self.target.symbol_id)
            .map_err(|err| format!("op target.symbol_id: {err}"))?;
        if self.writes.is_empty() {
            return Err("op writes must not be empty".to_string());
        }
        for symbol in self.writes.iter().chain(self.reads.iter()) {
            SymbolId::parse(symbol).map_err(|err| format!("op symbol set: {err}"))?;
        }
        for parent in &self.parents {
            if parent.trim().is_empty() {
                return Err("op parents must not contain empty ids".to_string());
            }
        }
        for conflict_id in &self.resolves {
            if conflict_id.trim().is_empty() {
                return Err("op resolves must not contain empty ids".to_string());
            }
        }
        match &self.effect.kind {
            EffectKind::Unknown => return Err("op effect kind is not recognized".to_string()),
            EffectKind::ReplaceBody { .. } => {
                if self.target.path_hint.is_none() {
                    return Err("replace_body requires target.path_hint".to_string());
                }
            }
            EffectKind::UpsertFile { path, .. }
            | EffectKind::DeleteFile { path }
            | EffectKind::JsonSetKey { path, .. }
            | EffectKind::JsonDeleteKey { path, .. }
            | EffectKind::PythonReplaceSymbol { path, .. }
            | EffectKind::PythonInsertSymbol { path, .. }
            | EffectKind::PythonDeleteSymbol { path, .. } => {
                if path.trim().is_empty() {
                    return Err("op effect path must not be empty".to_string());
                }
            }
        }
        Ok(())
    }

    /// Symbol the effect itself addresses, when it can be derived from the
    /// effect fields (used by legacy hash bookkeeping).
    pub fn effect_symbol(&self) -> Option<SymbolId> {
        match &self.effect.kind {
            EffectKind::JsonSetKey { path, key, .. } => Some(SymbolId::json_key(path, key)),
            EffectKind::PythonReplaceSymbol {
                path,
                symbol_kind,
                symbol_name,
                ..
            }
            | EffectKind::PythonInsertSymbol {
                path,
                symbol_kind,
                symbol_name,
                ..
            } => Some(SymbolId::python(path, (*symbol_kind).into(), symbol_name)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upsert(path: &str, content: &str) -> Operation {
        let symbol = format!("sym://text/{path}#document");
        Operation {
            id: String::new(),
            state: "main".to_string(),
            parents: Vec::new(),
            target: Target {
                symbol_id: symbol.clone(),
                path_hint: Some(path.to_string()),
            },
            preconditions: Vec::new(),
            reads: Vec::new(),
            writes: vec![symbol],
            effect: Effect::new(EffectKind::UpsertFile {
                path: path.to_string(),
                content: content.to_string(),
            }),
            resolves: Vec::new(),
            metadata: Map::new(),
            accepted_at: None,
            canonical_order: None,
        }
    }

    #[test]
    fn id_ignores_acceptance_fields() {
        let mut op = upsert("a.txt", "hi\n");
        let id = op.derive_id();
        op.id = id.clone();
        op.accepted_at = Some(1);
        op.canonical_order = Some(7);
        assert_eq!(op.derive_id(), id);
        assert!(id.starts_with(OP_ID_PREFIX));
    }

    #[test]
    fn id_tracks_content() {
        let base = upsert("a.txt", "hi\n");
        let mut changed = upsert("a.txt", "bye\n");
        assert_ne!(base.derive_id(), changed.derive_id());
        changed.effect = base.effect.clone();
        assert_eq!(base.derive_id(), changed.derive_id());
    }

    #[test]
    fn validation_rejects_broken_shapes() {
        let mut op = upsert("a.txt", "hi\n");
        op.writes.clear();
        assert!(op.validate().unwrap_err().contains("writes"));

        let mut op = upsert("a.txt", "hi\n");
        op.target.symbol_id = "not-a-symbol".to_string();
        assert!(op.validate().is_err());

        let mut op = upsert("a.txt", "hi\n");
        op.effect = Effect::new(EffectKind::ReplaceBody {
            after_content: "x".to_string(),
        });
        op.target.path_hint = None;
        assert!(op.validate().unwrap_err().contains("path_hint"));
    }

    #[test]
    fn effect_serde_uses_snake_case_tags() {
        let effect = Effect::new(EffectKind::JsonSetKey {
            path: "cfg.json".to_string(),
            key: "retries".to_string(),
            value: json!(3),
        });
        let value = serde_json::to_value(&effect).unwrap();
        assert_eq!(value["kind"], "json_set_key");
        let back: Effect = serde_json::from_value(value).unwrap();
        assert_eq!(back, effect);
    }

    #[test]
    fn unknown_effect_kinds_fail_validation() {
        let raw = json!({
            "kind": "rename_symbol",
            "path": "a.py"
        });
        let effect: Effect = serde_json::from_value(raw).unwrap();
        assert_eq!(effect.kind, EffectKind::Unknown);
        let mut op = upsert("a.txt", "hi\n");
        op.effect = effect;
        assert!(op.validate().is_err());
    }
}
