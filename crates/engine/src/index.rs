#![forbid(unsafe_code)]

use crate::Engine;
use forge_core::op::{EffectKind, Operation};
use forge_core::symbol::{Fragment, SymbolId};
use std::collections::BTreeMap;

impl Engine {
    /// Appends an accepted op to the log and folds it into every per-state
    /// index. The op must already carry `accepted_at` and `canonical_order`.
    pub(crate) fn accept_into_log(&mut self, op: Operation, now_ms: i64) {
        let state = op.state.clone();
        self.state_ops
            .entry(state.clone())
            .or_default()
            .push(op.id.clone());
        if let Some(meta) = self.states.get_mut(&state) {
            meta.absorb_accepted(&op.id, &op.parents, now_ms);
        }
        let head = self.symbol_head.entry(state.clone()).or_default();
        let hash = self.symbol_hash.entry(state).or_default();
        apply_symbol_bookkeeping(head, hash, &op);
        self.ops.insert(op.id.clone(), op);
    }

    /// Reflexive-transitive ancestry over `parents`, following both the
    /// committed log and the in-flight ops of the current change set.
    pub(crate) fn is_ancestor_or_self(
        &self,
        needle: &str,
        starts: &[String],
        local_parents: &BTreeMap<String, Vec<String>>,
    ) -> bool {
        let mut stack: Vec<&str> = starts.iter().map(String::as_str).collect();
        let mut visited: Vec<&str> = Vec::new();
        while let Some(current) = stack.pop() {
            if current == needle {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            let parents = local_parents
                .get(current)
                .map(Vec::as_slice)
                .or_else(|| self.ops.get(current).map(|op| op.parents.as_slice()));
            if let Some(parents) = parents {
                for parent in parents {
                    stack.push(parent);
                }
            }
        }
        false
    }
}

/// Symbol-hash bookkeeping for one accepted (or staged) write. Explicit
/// `symbol_hashes` entries win: `null` removes the cached hash, a string
/// sets it. Legacy ops without the map fall back to `after_hash` when the
/// effect addresses the written symbol. The head pointer is always updated.
pub(crate) fn apply_symbol_bookkeeping(
    head: &mut BTreeMap<String, String>,
    hash: &mut BTreeMap<String, String>,
    op: &Operation,
) {
    for symbol in &op.writes {
        match op
            .effect
            .symbol_hashes
            .as_ref()
            .and_then(|declared| declared.get(symbol))
        {
            Some(None) => {
                hash.remove(symbol);
            }
            Some(Some(value)) => {
                hash.insert(symbol.clone(), value.clone());
            }
            None => {
                if let Some(after) = legacy_after_hash(op, symbol) {
                    hash.insert(symbol.clone(), after);
                }
            }
        }
        head.insert(symbol.clone(), op.id.clone());
    }
}

fn legacy_after_hash(op: &Operation, symbol: &str) -> Option<String> {
    let after = op.effect.after_hash.clone()?;
    let parsed = SymbolId::parse(symbol).ok()?;
    match &op.effect.kind {
        EffectKind::UpsertFile { path, .. } => {
            (parsed.fragment == Fragment::Document && parsed.path == *path).then_some(after)
        }
        EffectKind::ReplaceBody { .. } => Some(after),
        EffectKind::JsonSetKey { .. }
        | EffectKind::PythonReplaceSymbol { .. }
        | EffectKind::PythonInsertSymbol { .. } => {
            (op.effect_symbol() == Some(parsed)).then_some(after)
        }
        _ => None,
    }
}
