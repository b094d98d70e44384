#![forbid(unsafe_code)]

use forge_core::adapter::{AdapterKind, Adapters, Edit, PythonEditOp};
use forge_core::hash::{content_hash_text, content_hash_value};
use forge_core::op::{Effect, EffectKind, Operation, Precondition, Target};
use forge_core::symbol::SymbolId;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Turns one file's local edit into ops: semantic key/symbol ops for
/// `.json` and `.py` files with a parseable diff, whole-document upserts and
/// deletes otherwise. Preconditions pin the observed before-state so
/// concurrent edits surface as conflicts instead of silent overwrites.
pub fn ops_for_file(
    adapters: &Adapters,
    state: &str,
    author: &str,
    path: &str,
    before: Option<&str>,
    after: Option<&str>,
    parents: &[String],
) -> Vec<Operation> {
    let document_symbol =
        SymbolId::document(AdapterKind::for_path(path).name(), path).to_string();

    let Some(after) = after else {
        // Local deletion.
        if before.is_none() {
            return Vec::new();
        }
        let mut effect = Effect::new(EffectKind::DeleteFile {
            path: path.to_string(),
        });
        effect.symbol_hashes = Some(one_hash(&document_symbol, None));
        let mut op = base_op(state, author, &document_symbol, path, effect, parents);
        op.preconditions = vec![Precondition::SymbolExists];
        return vec![op];
    };

    if let Some(before) = before {
        if let Some(edits) = adapters.diff(path, before, after) {
            return edits
                .into_iter()
                .filter_map(|edit| op_for_edit(state, author, path, edit, parents))
                .collect();
        }
    }

    // Document adapters, new files, and unparseable semantic files all go
    // through a whole-document upsert.
    let mut effect = Effect::new(EffectKind::UpsertFile {
        path: path.to_string(),
        content: after.to_string(),
    });
    effect.symbol_hashes = Some(one_hash(&document_symbol, Some(content_hash_text(after))));
    let mut op = base_op(state, author, &document_symbol, path, effect, parents);
    if let Some(before) = before {
        op.preconditions = vec![Precondition::SignatureHash {
            value: content_hash_text(before),
        }];
    }
    vec![op]
}

fn op_for_edit(
    state: &str,
    author: &str,
    path: &str,
    edit: Edit,
    parents: &[String],
) -> Option<Operation> {
    match edit {
        Edit::Json(edit) => {
            let symbol = SymbolId::json_key(path, &edit.key).to_string();
            let (effect_kind, declared) = if edit.after_exists {
                let value = edit.after_value.clone().unwrap_or(Value::Null);
                let declared = one_hash(&symbol, Some(content_hash_value(&value)));
                (
                    EffectKind::JsonSetKey {
                        path: path.to_string(),
                        key: edit.key.clone(),
                        value,
                    },
                    declared,
                )
            } else {
                (
                    EffectKind::JsonDeleteKey {
                        path: path.to_string(),
                        key: edit.key.clone(),
                    },
                    one_hash(&symbol, None),
                )
            };
            let mut effect = Effect::new(effect_kind);
            effect.symbol_hashes = Some(declared);
            let mut op = base_op(state, author, &symbol, path, effect, parents);
            if edit.before_exists {
                let before = edit.before_value.unwrap_or(Value::Null);
                op.preconditions = vec![Precondition::SignatureHash {
                    value: content_hash_value(&before),
                }];
            }
            Some(op)
        }
        Edit::Python(edit) => {
            let symbol = SymbolId::python(path, edit.kind, &edit.name).to_string();
            let (effect_kind, declared) = match edit.op {
                PythonEditOp::Replace => {
                    let after = edit.after_content.clone()?;
                    let declared = one_hash(&symbol, Some(content_hash_text(&after)));
                    (
                        EffectKind::PythonReplaceSymbol {
                            path: path.to_string(),
                            symbol_kind: edit.kind.into(),
                            symbol_name: edit.name.clone(),
                            before_content: edit.before_content.clone().unwrap_or_default(),
                            after_content: after,
                        },
                        declared,
                    )
                }
                PythonEditOp::Insert => {
                    let after = edit.after_content.clone()?;
                    let declared = one_hash(&symbol, Some(content_hash_text(&after)));
                    (
                        EffectKind::PythonInsertSymbol {
                            path: path.to_string(),
                            symbol_kind: edit.kind.into(),
                            symbol_name: edit.name.clone(),
                            after_content: after,
                            insert_after_key: edit.insert_after_key.clone(),
                            insert_before_key: edit.insert_before_key.clone(),
                        },
                        declared,
                    )
                }
                PythonEditOp::Delete => (
                    EffectKind::PythonDeleteSymbol {
                        path: path.to_string(),
                        symbol_kind: edit.kind.into(),
                        symbol_name: edit.name.clone(),
                        before_content: edit.before_content.clone().unwrap_or_default(),
                    },
                    one_hash(&symbol, None),
                ),
            };
            let mut effect = Effect::new(effect_kind);
            effect.symbol_hashes = Some(declared);
            let mut op = base_op(state, author, &symbol, path, effect, parents);
            if let Some(before) = edit.before_content {
                op.preconditions = vec![Precondition::SignatureHash {
                    value: content_hash_text(&before),
                }];
            }
            Some(op)
        }
    }
}

fn base_op(
    state: &str,
    author: &str,
    symbol: &str,
    path: &str,
    effect: Effect,
    parents: &[String],
) -> Operation {
    let mut metadata = Map::new();
    metadata.insert("author".to_string(), Value::from(author));
    Operation {
        id: String::new(),
        state: state.to_string(),
        parents: parents.to_vec(),
        target: Target {
            symbol_id: symbol.to_string(),
            path_hint: Some(path.to_string()),
        },
        preconditions: Vec::new(),
        reads: Vec::new(),
        writes: vec![symbol.to_string()],
        effect,
        resolves: Vec::new(),
        metadata,
        accepted_at: None,
        canonical_order: None,
    }
}

fn one_hash(symbol: &str, hash: Option<String>) -> BTreeMap<String, Option<String>> {
    let mut map = BTreeMap::new();
    map.insert(symbol.to_string(), hash);
    map
}
