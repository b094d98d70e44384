#![forbid(unsafe_code)]

use crate::hash::content_hash_text;
use crate::python::{PythonParser, symbol_key};
use crate::symbol::{SymbolId, SymbolKind};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PythonEditOp {
    Insert,
    Replace,
    Delete,
}

/// One symbol-level edit between two versions of a Python module.
#[derive(Clone, Debug, PartialEq)]
pub struct PythonEdit {
    pub op: PythonEditOp,
    pub kind: SymbolKind,
    pub name: String,
    pub before_content: Option<String>,
    pub after_content: Option<String>,
    pub insert_after_key: Option<String>,
    pub insert_before_key: Option<String>,
}

pub fn symbol_hashes(
    parser: &PythonParser,
    path: &str,
    text: &str,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let outcome = parser.parse_top_level(text);
    if outcome.parse_error {
        return out;
    }
    for parsed in outcome.symbols.values() {
        out.insert(
            SymbolId::python(path, parsed.kind, &parsed.name).to_string(),
            content_hash_text(&parsed.body),
        );
    }
    out
}

/// After-order inserts and modified replaces first, then before-only
/// symbols in name-sorted order as deletes. Byte-identical bodies are
/// skipped. `None` when either side fails to parse or has duplicates.
pub fn diff(parser: &PythonParser, before: &str, after: &str) -> Option<Vec<PythonEdit>> {
    let before_outcome = parser.parse_top_level(before);
    let after_outcome = parser.parse_top_level(after);
    if before_outcome.parse_error || after_outcome.parse_error {
        return None;
    }
    if !before_outcome.duplicates.is_empty() || !after_outcome.duplicates.is_empty() {
        return None;
    }

    let mut edits = Vec::new();
    for (index, key) in after_outcome.order.iter().enumerate() {
        let after_symbol = after_outcome.symbols.get(key)?;
        match before_outcome.symbols.get(key) {
            Some(before_symbol) if before_symbol.body == after_symbol.body => {}
            Some(before_symbol) => edits.push(PythonEdit {
                op: PythonEditOp::Replace,
                kind: after_symbol.kind,
                name: after_symbol.name.clone(),
                before_content: Some(before_symbol.body.clone()),
                after_content: Some(after_symbol.body.clone()),
                insert_after_key: None,
                insert_before_key: None,
            }),
            None => {
                let insert_after_key = index.checked_sub(1).map(|i| after_outcome.order[i].clone());
                let insert_before_key = if insert_after_key.is_none() {
                    after_outcome.order.get(index + 1).cloned()
                } else {
                    None
                };
                edits.push(PythonEdit {
                    op: PythonEditOp::Insert,
                    kind: after_symbol.kind,
                    name: after_symbol.name.clone(),
                    before_content: None,
                    after_content: Some(after_symbol.body.clone()),
                    insert_after_key,
                    insert_before_key,
                });
            }
        }
    }

    let mut deleted: Vec<_> = before_outcome
        .symbols
        .values()
        .filter(|symbol| {
            !after_outcome
                .symbols
                .contains_key(&symbol_key(symbol.kind, &symbol.name))
        })
        .collect();
    deleted.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.cmp(&b.kind)));
    for symbol in deleted {
        edits.push(PythonEdit {
            op: PythonEditOp::Delete,
            kind: symbol.kind,
            name: symbol.name.clone(),
            before_content: Some(symbol.body.clone()),
            after_content: None,
            insert_after_key: None,
            insert_before_key: None,
        });
    }
    Some(edits)
}

/// Replaces the located symbol's span. Pure and total: an unlocatable
/// symbol leaves the text unchanged. The replacement keeps at least one
/// trailing newline so the next symbol never glues onto it.
pub fn apply_replace(
    parser: &PythonParser,
    current: &str,
    kind: SymbolKind,
    name: &str,
    after_content: &str,
) -> String {
    let outcome = parser.parse_top_level(current);
    let Some(symbol) = outcome.symbols.get(&symbol_key(kind, name)) else {
        return current.to_string();
    };
    let mut block = after_content.to_string();
    if !block.ends_with('\n') {
        block.push('\n');
    }
    format!("{}{}{}", &current[..symbol.start], block, &current[symbol.end..])
}

pub fn apply_delete(parser: &PythonParser, current: &str, kind: SymbolKind, name: &str) -> String {
    let outcome = parser.parse_top_level(current);
    let Some(symbol) = outcome.symbols.get(&symbol_key(kind, name)) else {
        return current.to_string();
    };
    format!("{}{}", &current[..symbol.start], &current[symbol.end..])
}

/// Inserts a block anchored by `insert_after_key` end, else
/// `insert_before_key` start, else end of file. The block ends with exactly
/// one newline and is separated from preceding text by a newline.
pub fn apply_insert(
    parser: &PythonParser,
    current: &str,
    after_content: &str,
    insert_after_key: Option<&str>,
    insert_before_key: Option<&str>,
) -> String {
    let outcome = parser.parse_top_level(current);
    let position = insert_after_key
        .and_then(|key| outcome.symbols.get(key))
        .map(|symbol| symbol.end)
        .or_else(|| {
            insert_before_key
                .and_then(|key| outcome.symbols.get(key))
                .map(|symbol| symbol.start)
        })
        .unwrap_or(current.len());

    let mut block = after_content.trim_end_matches('\n').to_string();
    block.push('\n');
    if position > 0 && !current[..position].ends_with('\n') {
        block.insert(0, '\n');
    }
    format!("{}{}{}", &current[..position], block, &current[position..])
}
