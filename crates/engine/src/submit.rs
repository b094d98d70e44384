#![forbid(unsafe_code)]

use crate::classify::ConflictDraft;
use crate::index::apply_symbol_bookkeeping;
use crate::{Engine, EngineError, EngineEvent};
use forge_core::change::{ChangeSet, ChangeSetRecord, ChangeSetStatus, OpOutcome, OpResult};
use forge_core::conflict::{CONFLICT_ID_PREFIX, Conflict, ConflictStatus};
use forge_core::now_ms;
use forge_core::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Staged view of the target state during change-set evaluation. Nothing in
/// here is visible to readers; only the final commit step touches the
/// engine's real indexes.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    pub symbol_head: BTreeMap<String, String>,
    pub symbol_hash: BTreeMap<String, String>,
    pub tree: BTreeMap<String, String>,
    /// Parents of ops accepted earlier in the same change set, so later ops
    /// may cite them as ancestors before anything is committed.
    pub local_parents: BTreeMap<String, Vec<String>>,
    pub has_open_conflicts: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub ok: bool,
    pub change_set_id: String,
    pub status: ChangeSetStatus,
    /// Op ids committed to the log (empty unless `status == accepted`).
    pub accepted: Vec<String>,
    /// Conflict ids recorded by this submission, sorted lexicographically.
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub conflict_details: Vec<Conflict>,
    pub results: Vec<OpResult>,
    /// True when an identical change-set id was already recorded and the
    /// stored outcome is being replayed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl Engine {
    /// The only write path for ops. Accepts everything or nothing: either
    /// every op in the set lands in the log, or the set is recorded as
    /// conflicted/rejected with durable conflict rows and no index mutation.
    pub fn submit(
        &mut self,
        change: ChangeSet,
    ) -> Result<(SubmitOutcome, Vec<EngineEvent>), EngineError> {
        let now = now_ms();
        let mut change = change;

        // 1. Normalize: shape-check the set, default timestamps, assign
        // content-addressed ids where missing.
        change.validate().map_err(EngineError::InvalidInput)?;
        for op in &mut change.ops {
            op.accepted_at = None;
            op.canonical_order = None;
            if op.timestamp_ms().is_none() {
                op.metadata
                    .insert("timestamp".to_string(), Value::from(now));
            }
            if op.id.is_empty() {
                op.id = op.derive_id();
            }
        }
        if change.id.is_empty() {
            change.id = change.derive_id();
        }

        // 2. Idempotency: an already-recorded id replays its outcome, so
        // submission is safe to retry.
        if let Some(record) = self.change_sets.get(&change.id) {
            return Ok((self.outcome_from_record(record), Vec::new()));
        }

        // 3. The target state must exist.
        if !self.states.contains_key(&change.state) {
            return Err(EngineError::UnknownState(change.state.clone()));
        }

        // 4. Stage a consistent copy of the state's view.
        let mut staging = Staging {
            symbol_head: self
                .symbol_head
                .get(&change.state)
                .cloned()
                .unwrap_or_default(),
            symbol_hash: self
                .symbol_hash
                .get(&change.state)
                .cloned()
                .unwrap_or_default(),
            tree: self.materialize(&change.state),
            local_parents: BTreeMap::new(),
            has_open_conflicts: self.open_conflict_count(&change.state) > 0,
        };

        // 5. Evaluate ops in order; the first failure stops evaluation and
        // skips the rest.
        let mut results: Vec<OpResult> = Vec::new();
        let mut staged: Vec<Operation> = Vec::new();
        let mut new_conflicts: Vec<Conflict> = Vec::new();
        let mut stopped = false;
        let mut rejected = false;

        for op in &change.ops {
            if stopped {
                results.push(OpResult::new(&op.id, OpOutcome::Skipped));
                continue;
            }
            if op.state != change.state {
                let mut result = OpResult::new(&op.id, OpOutcome::Rejected);
                result.error = Some("op state does not match change set state".to_string());
                results.push(result);
                stopped = true;
                rejected = true;
                continue;
            }
            if let Err(error) = op.validate() {
                let mut result = OpResult::new(&op.id, OpOutcome::Rejected);
                result.error = Some(error);
                results.push(result);
                stopped = true;
                rejected = true;
                continue;
            }
            if self.ops.contains_key(&op.id) {
                let mut result = OpResult::new(&op.id, OpOutcome::Accepted);
                result.duplicate = true;
                results.push(result);
                continue;
            }

            let state_meta = self
                .states
                .get(&change.state)
                .cloned()
                .ok_or_else(|| EngineError::UnknownState(change.state.clone()))?;
            let drafts = self.classify(op, &state_meta, &staging);
            if !drafts.is_empty() {
                let mut conflict_ids = Vec::new();
                for draft in drafts {
                    let conflict = self.record_conflict(&change.state, draft, now);
                    conflict_ids.push(conflict.id.clone());
                    new_conflicts.push(conflict);
                }
                conflict_ids.sort();
                let mut result = OpResult::new(&op.id, OpOutcome::Conflicted);
                result.conflict_ids = conflict_ids;
                results.push(result);
                stopped = true;
                continue;
            }

            self.adapters
                .apply_effect(&mut staging.tree, &op.effect, op.target.path_hint.as_deref());
            apply_symbol_bookkeeping(&mut staging.symbol_head, &mut staging.symbol_hash, op);
            staging.local_parents.insert(op.id.clone(), op.parents.clone());
            staged.push(op.clone());
            results.push(OpResult::new(&op.id, OpOutcome::Accepted));
        }

        // 6. Commit everything or record the failure.
        let mut events = Vec::new();
        let mut accepted_ids = Vec::new();
        let status = if !stopped {
            for mut op in staged {
                self.sequence += 1;
                op.accepted_at = Some(now);
                op.canonical_order = Some(self.sequence);
                let op_id = op.id.clone();
                let resolves = op.resolves.clone();
                self.accept_into_log(op, now);
                events.push(EngineEvent::OpAccepted {
                    state: change.state.clone(),
                    op_id: op_id.clone(),
                });
                accepted_ids.push(op_id.clone());
                events.extend(self.resolve_listed_conflicts(&resolves, &op_id, now));
            }
            ChangeSetStatus::Accepted
        } else if rejected {
            ChangeSetStatus::Rejected
        } else {
            ChangeSetStatus::Conflicted
        };

        for conflict in &new_conflicts {
            events.push(EngineEvent::Conflict {
                state: conflict.state.clone(),
                conflict_id: conflict.id.clone(),
                status: ConflictStatus::Open,
            });
        }

        let mut conflict_ids: Vec<String> =
            new_conflicts.iter().map(|conflict| conflict.id.clone()).collect();
        conflict_ids.sort();

        self.change_set_sequence += 1;
        let record = ChangeSetRecord {
            id: change.id.clone(),
            sequence: self.change_set_sequence,
            state: change.state.clone(),
            status,
            metadata: change.metadata.clone(),
            results: results.clone(),
            accepted: accepted_ids.clone(),
            conflicts: conflict_ids.clone(),
            created_at: now,
        };
        self.change_sets.insert(change.id.clone(), record);

        events.push(EngineEvent::ChangeSet {
            state: change.state.clone(),
            change_set_id: change.id.clone(),
            status,
        });
        if status == ChangeSetStatus::Accepted {
            events.push(EngineEvent::StateUpdate {
                state: change.state.clone(),
            });
        }

        let outcome = SubmitOutcome {
            ok: true,
            change_set_id: change.id,
            status,
            accepted: accepted_ids,
            conflict_details: new_conflicts,
            conflicts: conflict_ids,
            results,
            replayed: false,
        };
        Ok((outcome, events))
    }

    /// Legacy entry point: wraps loose ops in an anonymous change set that
    /// inherits the first op's state and author.
    pub fn submit_ops(
        &mut self,
        ops: Vec<Operation>,
    ) -> Result<(SubmitOutcome, Vec<EngineEvent>), EngineError> {
        let Some(first) = ops.first() else {
            return Err(EngineError::InvalidInput(
                "ops must not be empty".to_string(),
            ));
        };
        let mut metadata = Map::new();
        if let Some(author) = first.author() {
            metadata.insert("author".to_string(), Value::from(author));
        }
        let change = ChangeSet {
            id: String::new(),
            state: first.state.clone(),
            metadata,
            ops,
        };
        self.submit(change)
    }

    pub(crate) fn record_conflict(
        &mut self,
        state: &str,
        draft: ConflictDraft,
        now: i64,
    ) -> Conflict {
        self.conflict_sequence += 1;
        let conflict = Conflict {
            id: format!("{CONFLICT_ID_PREFIX}{}", self.conflict_sequence),
            state: state.to_string(),
            ops: draft.ops,
            conflict_type: draft.conflict_type,
            target: draft.target,
            reason: draft.reason,
            status: ConflictStatus::Open,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        };
        self.conflicts.insert(conflict.id.clone(), conflict.clone());
        conflict
    }

    /// Marks every still-open conflict listed by an accepted op as resolved.
    fn resolve_listed_conflicts(
        &mut self,
        resolves: &[String],
        op_id: &str,
        now: i64,
    ) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for conflict_id in resolves {
            let Some(conflict) = self.conflicts.get_mut(conflict_id) else {
                continue;
            };
            if !conflict.is_open() {
                continue;
            }
            conflict.status = ConflictStatus::Resolved;
            conflict.resolved_at = Some(now);
            conflict.resolved_by = Some(op_id.to_string());
            events.push(EngineEvent::Conflict {
                state: conflict.state.clone(),
                conflict_id: conflict_id.clone(),
                status: ConflictStatus::Resolved,
            });
        }
        events
    }

    fn outcome_from_record(&self, record: &ChangeSetRecord) -> SubmitOutcome {
        SubmitOutcome {
            ok: true,
            change_set_id: record.id.clone(),
            status: record.status,
            accepted: record.accepted.clone(),
            conflicts: record.conflicts.clone(),
            conflict_details: record
                .conflicts
                .iter()
                .filter_map(|id| self.conflicts.get(id).cloned())
                .collect(),
            results: record.results.clone(),
            replayed: true,
        }
    }
}
