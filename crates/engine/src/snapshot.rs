#![forbid(unsafe_code)]

use crate::Engine;
use crate::index::apply_symbol_bookkeeping;
use forge_core::adapter::Adapters;
use forge_core::now_ms;
use forge_core::op::Operation;
use forge_core::snapshot::SnapshotDoc;
use forge_core::state::{DEFAULT_STATE, StateMeta};
use std::collections::{BTreeMap, BTreeSet};

impl Engine {
    /// Serializes the engine into the single persisted JSON document.
    /// Derived indexes are omitted; `from_snapshot` rebuilds them.
    pub fn snapshot(&self) -> SnapshotDoc {
        let mut ops: Vec<Operation> = self.ops.values().cloned().collect();
        ops.sort_by_key(|op| op.canonical_order.unwrap_or_default());
        let mut change_sets: Vec<_> = self.change_sets.values().cloned().collect();
        change_sets.sort_by_key(|record| record.sequence);
        let mut conflicts: Vec<_> = self.conflicts.values().cloned().collect();
        conflicts.sort_by_key(|conflict| (conflict.created_at, conflict.id.clone()));
        SnapshotDoc {
            sequence: self.sequence,
            conflict_sequence: self.conflict_sequence,
            change_set_sequence: self.change_set_sequence,
            ops,
            change_sets,
            conflicts,
            states: self.states.values().cloned().collect(),
        }
    }

    /// Loads a persisted document and rebuilds every derived index
    /// (`state_ops`, `symbol_head`, `symbol_hash`) plus, as a self-heal,
    /// `state.heads`.
    pub fn from_snapshot(doc: SnapshotDoc, adapters: Adapters) -> Self {
        let mut engine = Self::new(adapters);
        engine.sequence = doc.sequence;
        engine.conflict_sequence = doc.conflict_sequence;
        engine.change_set_sequence = doc.change_set_sequence;
        if !doc.states.is_empty() {
            engine.states.clear();
        }
        for state in doc.states {
            engine.states.insert(state.name.clone(), state);
        }
        if !engine.states.contains_key(DEFAULT_STATE) {
            engine
                .states
                .insert(DEFAULT_STATE.to_string(), StateMeta::new(DEFAULT_STATE, now_ms()));
        }
        for op in doc.ops {
            engine.ops.insert(op.id.clone(), op);
        }
        for record in doc.change_sets {
            engine.change_sets.insert(record.id.clone(), record);
        }
        for conflict in doc.conflicts {
            engine.conflicts.insert(conflict.id.clone(), conflict);
        }
        engine.rebuild();
        engine
    }

    fn rebuild(&mut self) {
        self.state_ops.clear();
        self.symbol_head.clear();
        self.symbol_hash.clear();

        let mut ordered: Vec<(u64, String, String)> = self
            .ops
            .values()
            .map(|op| {
                (
                    op.canonical_order.unwrap_or_default(),
                    op.state.clone(),
                    op.id.clone(),
                )
            })
            .collect();
        ordered.sort();
        for (order, state, op_id) in &ordered {
            self.state_ops.entry(state.clone()).or_default().push(op_id.clone());
            self.sequence = self.sequence.max(*order);
        }
        // Documents from before the sequence keys were persisted still carry
        // numbered rows; counters heal from those so fresh ids never collide.
        for conflict in self.conflicts.values() {
            if let Some(n) = conflict
                .id
                .strip_prefix("conf_")
                .and_then(|raw| raw.parse::<u64>().ok())
            {
                self.conflict_sequence = self.conflict_sequence.max(n);
            }
        }
        for record in self.change_sets.values() {
            self.change_set_sequence = self.change_set_sequence.max(record.sequence);
        }

        let names: Vec<String> = self.states.keys().cloned().collect();
        for name in &names {
            self.state_ops.entry(name.clone()).or_default();
            let mut visiting = BTreeSet::new();
            self.rebuild_symbol_maps(name, &mut visiting);
        }
        for name in &names {
            self.rebuild_heads(name);
        }
    }

    /// Symbol maps are the fold over the ancestry then the state's own ops
    /// in canonical order. Base links may form cycles after renames; the
    /// visiting set breaks re-entry with empty maps.
    fn rebuild_symbol_maps(&mut self, name: &str, visiting: &mut BTreeSet<String>) {
        if self.symbol_head.contains_key(name) {
            return;
        }
        if !visiting.insert(name.to_string()) {
            self.symbol_head.entry(name.to_string()).or_default();
            self.symbol_hash.entry(name.to_string()).or_default();
            return;
        }

        let base = self
            .states
            .get(name)
            .and_then(|meta| meta.base_state.clone())
            .filter(|base| self.states.contains_key(base));
        let (mut head, mut hash) = match base {
            Some(base) => {
                self.rebuild_symbol_maps(&base, visiting);
                (
                    self.symbol_head.get(&base).cloned().unwrap_or_default(),
                    self.symbol_hash.get(&base).cloned().unwrap_or_default(),
                )
            }
            None => (BTreeMap::new(), BTreeMap::new()),
        };

        for op_id in self.state_ops.get(name).cloned().unwrap_or_default() {
            if let Some(op) = self.ops.get(&op_id) {
                apply_symbol_bookkeeping(&mut head, &mut hash, op);
            }
        }
        self.symbol_head.insert(name.to_string(), head);
        self.symbol_hash.insert(name.to_string(), hash);
    }

    /// Heads are recomputed from the creation-time `base_heads` plus the
    /// local op fold; forked states are not re-synced with an evolved base.
    fn rebuild_heads(&mut self, name: &str) {
        let Some(meta) = self.states.get(name) else {
            return;
        };
        let mut heads: Vec<String> = Vec::new();
        for head in &meta.base_heads {
            if !heads.contains(head) {
                heads.push(head.clone());
            }
        }
        for op_id in self.state_ops.get(name).cloned().unwrap_or_default() {
            let Some(op) = self.ops.get(&op_id) else {
                continue;
            };
            heads.retain(|head| !op.parents.contains(head));
            if !heads.contains(&op.id) {
                heads.push(op.id.clone());
            }
        }
        heads.sort();
        if let Some(meta) = self.states.get_mut(name) {
            meta.heads = heads;
        }
    }
}
