#![forbid(unsafe_code)]

use super::AdapterKind;
use crate::hash::content_hash_text;
use crate::symbol::SymbolId;
use std::collections::BTreeMap;

/// Document adapters expose a single `#document` symbol covering the whole
/// file.
pub fn symbol_hashes(kind: AdapterKind, path: &str, text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(
        SymbolId::document(kind.name(), path).to_string(),
        content_hash_text(text),
    );
    out
}
