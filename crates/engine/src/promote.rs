#![forbid(unsafe_code)]

use crate::{Engine, EngineError, EngineEvent};
use forge_core::change::{ChangeSet, ChangeSetStatus, OpOutcome};
use forge_core::hash::digest20;
use forge_core::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromoteResult {
    pub source_op_id: String,
    pub status: OpOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromoteOutcome {
    pub ok: bool,
    pub source_state: String,
    pub target_state: String,
    /// Promoted op ids committed to the target, in order.
    pub accepted: Vec<String>,
    pub conflicts: Vec<String>,
    pub results: Vec<PromoteResult>,
}

impl Engine {
    /// Rebases the source state's op list onto the target, one single-op
    /// change set at a time, stopping at the first conflict or rejection.
    /// Promotion ids are derived from the source op and the rebase point, so
    /// re-running a partially applied promotion reuses the same ids and the
    /// log's identity rule turns replays into skips.
    pub fn promote(
        &mut self,
        source: &str,
        target: &str,
        author: &str,
    ) -> Result<(PromoteOutcome, Vec<EngineEvent>), EngineError> {
        if source == target {
            return Err(EngineError::InvalidInput(
                "source and target states must differ".to_string(),
            ));
        }
        let Some(source_meta) = self.states.get(source) else {
            return Err(EngineError::UnknownState(source.to_string()));
        };
        if !self.states.contains_key(target) {
            return Err(EngineError::UnknownState(target.to_string()));
        }

        // source op id → its promoted counterpart already in the target.
        let already_promoted: BTreeMap<String, String> = self
            .ops_for_state(target)
            .iter()
            .filter_map(|op_id| self.ops.get(op_id))
            .filter_map(|op| {
                op.source_op_id()
                    .map(|source_id| (source_id.to_string(), op.id.clone()))
            })
            .collect();
        // Rebase from the fork point the source actually saw, not the
        // target's live heads: work promoted from a sibling state must NOT
        // claim descent from writes it never observed, or divergent edits
        // would slip past the write-conflict rule. Skips advance the cursor
        // through the previously promoted counterparts.
        let mut parent_heads = source_meta.base_heads.clone();
        let source_op_ids: Vec<String> = self.ops_for_state(source).to_vec();

        let mut results = Vec::new();
        let mut accepted = Vec::new();
        let mut conflicts = Vec::new();
        let mut events = Vec::new();
        let mut stopped = false;

        for source_op_id in source_op_ids {
            if let Some(counterpart) = already_promoted.get(&source_op_id) {
                parent_heads = vec![counterpart.clone()];
                results.push(PromoteResult {
                    source_op_id,
                    status: OpOutcome::Skipped,
                    op_id: None,
                    conflict_ids: Vec::new(),
                });
                continue;
            }
            let Some(source_op) = self.ops.get(&source_op_id).cloned() else {
                continue;
            };

            let mut promoted = source_op;
            promoted.state = target.to_string();
            promoted.parents = parent_heads.clone();
            promoted.resolves = Vec::new();
            promoted.accepted_at = None;
            promoted.canonical_order = None;
            promoted
                .metadata
                .insert("author".to_string(), Value::from(author));
            promoted.metadata.insert(
                "intent".to_string(),
                Value::from(format!("Promote {source_op_id} from {source}")),
            );
            promoted
                .metadata
                .insert("source_state".to_string(), Value::from(source));
            promoted
                .metadata
                .insert("source_op_id".to_string(), Value::from(source_op_id.clone()));
            promoted
                .metadata
                .insert("timestamp".to_string(), Value::from(now_ms()));
            promoted.id = format!(
                "op_promote_{}",
                digest20(&json!({
                    "source_op_id": source_op_id,
                    "source_state": source,
                    "target_state": target,
                    "parent_heads": parent_heads,
                }))
            );
            let promoted_id = promoted.id.clone();

            let mut metadata = Map::new();
            metadata.insert("author".to_string(), Value::from(author));
            let change = ChangeSet {
                id: String::new(),
                state: target.to_string(),
                metadata,
                ops: vec![promoted],
            };
            let (outcome, batch_events) = self.submit(change)?;
            events.extend(batch_events);

            match outcome.status {
                ChangeSetStatus::Accepted => {
                    parent_heads = vec![promoted_id.clone()];
                    accepted.push(promoted_id.clone());
                    results.push(PromoteResult {
                        source_op_id,
                        status: OpOutcome::Accepted,
                        op_id: Some(promoted_id),
                        conflict_ids: Vec::new(),
                    });
                }
                ChangeSetStatus::Conflicted => {
                    conflicts.extend(outcome.conflicts.iter().cloned());
                    results.push(PromoteResult {
                        source_op_id,
                        status: OpOutcome::Conflicted,
                        op_id: Some(promoted_id),
                        conflict_ids: outcome.conflicts,
                    });
                    stopped = true;
                }
                ChangeSetStatus::Rejected => {
                    results.push(PromoteResult {
                        source_op_id,
                        status: OpOutcome::Rejected,
                        op_id: Some(promoted_id),
                        conflict_ids: Vec::new(),
                    });
                    stopped = true;
                }
            }
            if stopped {
                break;
            }
        }

        let outcome = PromoteOutcome {
            ok: !stopped,
            source_state: source.to_string(),
            target_state: target.to_string(),
            accepted,
            conflicts,
            results,
        };
        Ok((outcome, events))
    }
}
