#![forbid(unsafe_code)]

pub mod document;
pub mod json;
pub mod python;

use crate::hash::{content_hash_text, content_hash_value};
use crate::op::{Effect, EffectKind};
use crate::python::{ParseOutcome, PythonParser, symbol_key};
use crate::symbol::{Fragment, SymbolId};
use std::collections::BTreeMap;

pub use json::JsonEdit;
pub use python::{PythonEdit, PythonEditOp};

/// Adapter selected for a path by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterKind {
    Text,
    Markdown,
    Json,
    Python,
    File,
}

impl AdapterKind {
    pub fn for_path(path: &str) -> Self {
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "py" => Self::Python,
            "json" => Self::Json,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::Text,
            _ => Self::File,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Python => "python",
            Self::File => "file",
        }
    }

    /// Document adapters track the whole file as one symbol.
    pub fn is_document(self) -> bool {
        matches!(self, Self::Text | Self::Markdown | Self::File)
    }
}

/// One minimal edit between two versions of a file, as produced by
/// `Adapters::diff`. Document adapters are never diffed; callers use
/// file-level upserts and deletes directly.
#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    Json(JsonEdit),
    Python(PythonEdit),
}

/// The adapter registry: dispatch by extension plus the configured Python
/// parsing capability. Everything here is pure with respect to the tree.
#[derive(Clone, Debug)]
pub struct Adapters {
    python: PythonParser,
}

impl Adapters {
    pub fn new(python: PythonParser) -> Self {
        Self { python }
    }

    /// Registry backed by the regex fallback parser only.
    pub fn with_fallback_parser() -> Self {
        Self::new(PythonParser::fallback_only())
    }

    pub fn parse_python(&self, text: &str) -> ParseOutcome {
        self.python.parse_top_level(text)
    }

    /// Map of symbol id → content hash for one file's text.
    pub fn symbol_hashes(&self, path: &str, text: &str) -> BTreeMap<String, String> {
        let kind = AdapterKind::for_path(path);
        match kind {
            AdapterKind::Json => json::symbol_hashes(path, text),
            AdapterKind::Python => python::symbol_hashes(&self.python, path, text),
            _ => document::symbol_hashes(kind, path, text),
        }
    }

    /// Minimal edit list between two versions of a file; `None` when the
    /// adapter cannot diff (document adapters, unparseable JSON, Python
    /// parse failures or duplicate symbols).
    pub fn diff(&self, path: &str, before: &str, after: &str) -> Option<Vec<Edit>> {
        match AdapterKind::for_path(path) {
            AdapterKind::Json => Some(
                json::diff(before, after)?
                    .into_iter()
                    .map(Edit::Json)
                    .collect(),
            ),
            AdapterKind::Python => Some(
                python::diff(&self.python, before, after)?
                    .into_iter()
                    .map(Edit::Python)
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Applies one effect to a tree. Total: malformed or unknown effects
    /// leave the tree unchanged.
    pub fn apply_effect(
        &self,
        tree: &mut BTreeMap<String, String>,
        effect: &Effect,
        path_hint: Option<&str>,
    ) {
        match &effect.kind {
            EffectKind::UpsertFile { path, content } => {
                tree.insert(path.clone(), content.clone());
            }
            EffectKind::DeleteFile { path } => {
                tree.remove(path);
            }
            EffectKind::JsonSetKey { path, key, value } => {
                let current = tree.get(path).map(String::as_str).unwrap_or_default();
                let next = json::apply_set_key(current, key, value);
                tree.insert(path.clone(), next);
            }
            EffectKind::JsonDeleteKey { path, key } => {
                if let Some(current) = tree.get(path) {
                    let next = json::apply_delete_key(current, key);
                    tree.insert(path.clone(), next);
                }
            }
            EffectKind::PythonReplaceSymbol {
                path,
                symbol_kind,
                symbol_name,
                after_content,
                ..
            } => {
                if let Some(current) = tree.get(path) {
                    let next = python::apply_replace(
                        &self.python,
                        current,
                        (*symbol_kind).into(),
                        symbol_name,
                        after_content,
                    );
                    tree.insert(path.clone(), next);
                }
            }
            EffectKind::PythonInsertSymbol {
                path,
                after_content,
                insert_after_key,
                insert_before_key,
                ..
            } => {
                let current = tree.get(path).map(String::as_str).unwrap_or_default();
                let next = python::apply_insert(
                    &self.python,
                    current,
                    after_content,
                    insert_after_key.as_deref(),
                    insert_before_key.as_deref(),
                );
                tree.insert(path.clone(), next);
            }
            EffectKind::PythonDeleteSymbol {
                path,
                symbol_kind,
                symbol_name,
                ..
            } => {
                if let Some(current) = tree.get(path) {
                    let next = python::apply_delete(
                        &self.python,
                        current,
                        (*symbol_kind).into(),
                        symbol_name,
                    );
                    tree.insert(path.clone(), next);
                }
            }
            EffectKind::ReplaceBody { after_content } => {
                if let Some(path) = path_hint {
                    tree.insert(path.to_string(), after_content.clone());
                }
            }
            EffectKind::Unknown => {}
        }
    }

    /// Hash of a symbol's current content derived from actual file text.
    /// This beats any declared hash cache when it is computable, giving the
    /// classifier a semantic check even for legacy ops.
    pub fn derived_symbol_hash(&self, symbol: &SymbolId, file_text: Option<&str>) -> Option<String> {
        let text = file_text?;
        match &symbol.fragment {
            Fragment::Document => Some(content_hash_text(text)),
            Fragment::JsonKey(key) => {
                json::top_level_value(text, key).map(|value| content_hash_value(&value))
            }
            Fragment::Python { kind, name } => {
                let outcome = self.parse_python(text);
                if outcome.parse_error {
                    return None;
                }
                outcome
                    .symbols
                    .get(&symbol_key(*kind, name))
                    .map(|parsed| content_hash_text(&parsed.body))
            }
        }
    }
}
