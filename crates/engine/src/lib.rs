#![forbid(unsafe_code)]

mod classify;
mod events;
mod index;
mod materialize;
mod promote;
mod resolve;
mod snapshot;
mod submit;

pub use events::EngineEvent;
pub use promote::{PromoteOutcome, PromoteResult};
pub use resolve::ResolveOutcome;
pub use submit::SubmitOutcome;

use forge_core::adapter::Adapters;
use forge_core::change::ChangeSetRecord;
use forge_core::conflict::Conflict;
use forge_core::now_ms;
use forge_core::op::Operation;
use forge_core::state::{DEFAULT_STATE, StateMeta, validate_state_name};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    InvalidInput(String),
    UnknownState(String),
    UnknownConflict(String),
    StateExists(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownState(name) => write!(f, "unknown state: {name}"),
            Self::UnknownConflict(id) => write!(f, "unknown conflict: {id}"),
            Self::StateExists(name) => write!(f, "state already exists: {name}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The engine aggregate. One owned value holds the op log, the state table,
/// conflict and change-set records, and every derived index; all mutation
/// goes through `&mut self`, so a single writer lock above it gives the
/// sequential-consistency contract for free.
#[derive(Debug)]
pub struct Engine {
    adapters: Adapters,
    ops: BTreeMap<String, Operation>,
    change_sets: BTreeMap<String, ChangeSetRecord>,
    conflicts: BTreeMap<String, Conflict>,
    states: BTreeMap<String, StateMeta>,
    /// Accepted op ids per state, in acceptance order.
    state_ops: BTreeMap<String, Vec<String>>,
    /// state → symbol → most recent op id that wrote the symbol.
    symbol_head: BTreeMap<String, BTreeMap<String, String>>,
    /// state → symbol → last declared or derived post-effect hash.
    symbol_hash: BTreeMap<String, BTreeMap<String, String>>,
    sequence: u64,
    conflict_sequence: u64,
    change_set_sequence: u64,
}

impl Engine {
    /// Fresh engine with the bootstrap `main` state.
    pub fn new(adapters: Adapters) -> Self {
        let mut engine = Self {
            adapters,
            ops: BTreeMap::new(),
            change_sets: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            states: BTreeMap::new(),
            state_ops: BTreeMap::new(),
            symbol_head: BTreeMap::new(),
            symbol_hash: BTreeMap::new(),
            sequence: 0,
            conflict_sequence: 0,
            change_set_sequence: 0,
        };
        engine.insert_state(StateMeta::new(DEFAULT_STATE, now_ms()));
        engine
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    fn insert_state(&mut self, meta: StateMeta) {
        let name = meta.name.clone();
        self.states.insert(name.clone(), meta);
        self.state_ops.entry(name.clone()).or_default();
        self.symbol_head.entry(name.clone()).or_default();
        self.symbol_hash.entry(name).or_default();
    }

    /// Creates a state, inheriting heads and symbol indexes from the parent
    /// by deep copy; orphan states start empty.
    pub fn create_state(
        &mut self,
        name: &str,
        from_state: Option<&str>,
    ) -> Result<(StateMeta, Vec<EngineEvent>), EngineError> {
        validate_state_name(name).map_err(|err| EngineError::InvalidInput(err.to_string()))?;
        if self.states.contains_key(name) {
            return Err(EngineError::StateExists(name.to_string()));
        }

        let mut meta = StateMeta::new(name, now_ms());
        if let Some(base) = from_state {
            let Some(base_meta) = self.states.get(base) else {
                return Err(EngineError::UnknownState(base.to_string()));
            };
            meta.base_state = Some(base.to_string());
            meta.base_heads = base_meta.heads.clone();
            meta.heads = base_meta.heads.clone();
            let head = self.symbol_head.get(base).cloned().unwrap_or_default();
            let hash = self.symbol_hash.get(base).cloned().unwrap_or_default();
            self.symbol_head.insert(name.to_string(), head);
            self.symbol_hash.insert(name.to_string(), hash);
        }
        self.insert_state(meta.clone());

        Ok((
            meta,
            vec![EngineEvent::StateUpdate {
                state: name.to_string(),
            }],
        ))
    }

    pub fn state(&self, name: &str) -> Option<&StateMeta> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &StateMeta> {
        self.states.values()
    }

    pub fn op(&self, id: &str) -> Option<&Operation> {
        self.ops.get(id)
    }

    /// Accepted op ids for one state, in acceptance order.
    pub fn ops_for_state(&self, state: &str) -> &[String] {
        self.state_ops
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn change_set(&self, id: &str) -> Option<&ChangeSetRecord> {
        self.change_sets.get(id)
    }

    pub fn change_sets(&self, state: Option<&str>) -> Vec<&ChangeSetRecord> {
        let mut records: Vec<&ChangeSetRecord> = self
            .change_sets
            .values()
            .filter(|record| state.is_none_or(|name| record.state == name))
            .collect();
        records.sort_by_key(|record| record.sequence);
        records
    }

    pub fn conflict(&self, id: &str) -> Option<&Conflict> {
        self.conflicts.get(id)
    }

    pub fn conflicts_for_state(&self, state: &str) -> Vec<&Conflict> {
        let mut records: Vec<&Conflict> = self
            .conflicts
            .values()
            .filter(|conflict| conflict.state == state)
            .collect();
        records.sort_by_key(|conflict| (conflict.created_at, conflict.id.clone()));
        records
    }

    pub fn open_conflicts_for_state(&self, state: &str) -> Vec<&Conflict> {
        self.conflicts_for_state(state)
            .into_iter()
            .filter(|conflict| conflict.is_open())
            .collect()
    }

    pub fn open_conflict_count(&self, state: &str) -> usize {
        self.open_conflicts_for_state(state).len()
    }

    /// Head-op id for a symbol in a state, if any.
    pub fn symbol_head(&self, state: &str, symbol: &str) -> Option<&str> {
        self.symbol_head
            .get(state)?
            .get(symbol)
            .map(String::as_str)
    }

    /// Last known content hash for a symbol in a state, if any.
    pub fn symbol_hash(&self, state: &str, symbol: &str) -> Option<&str> {
        self.symbol_hash
            .get(state)?
            .get(symbol)
            .map(String::as_str)
    }

    /// One-line state summary used by listings and snapshots.
    pub fn state_summary(&self, meta: &StateMeta) -> Value {
        json!({
            "name": meta.name,
            "base_state": meta.base_state,
            "base_heads": meta.base_heads,
            "heads": meta.heads,
            "policy": meta.policy,
            "op_count": self.ops_for_state(&meta.name).len(),
            "open_conflicts": self.open_conflict_count(&meta.name),
            "created_at": meta.created_at,
            "updated_at": meta.updated_at,
        })
    }

    /// Self-contained snapshot payload served over HTTP and SSE.
    pub fn state_snapshot(&self, name: &str) -> Option<Value> {
        let meta = self.states.get(name)?;
        Some(json!({
            "state": self.state_summary(meta),
            "open_conflicts": self.open_conflicts_for_state(name),
            "tree": self.materialize(name),
        }))
    }
}
