#![forbid(unsafe_code)]

use crate::Engine;
use crate::submit::Staging;
use forge_core::conflict::ConflictType;
use forge_core::op::{Operation, Precondition};
use forge_core::state::StateMeta;
use forge_core::symbol::SymbolId;

/// A conflict the classifier wants recorded; ids and timestamps are
/// assigned when the submission pipeline persists it.
#[derive(Clone, Debug)]
pub(crate) struct ConflictDraft {
    pub conflict_type: ConflictType,
    pub target: String,
    pub reason: String,
    pub ops: Vec<String>,
}

impl Engine {
    /// Evaluates one op against the staged view of its target state. Rules
    /// run in a fixed order and may all contribute; an empty result means
    /// the op is acceptable.
    pub(crate) fn classify(
        &self,
        op: &Operation,
        state: &StateMeta,
        staging: &Staging,
    ) -> Vec<ConflictDraft> {
        let mut drafts = Vec::new();
        self.classify_preconditions(op, staging, &mut drafts);
        self.classify_semantic_writes(op, staging, &mut drafts);
        self.classify_policy(op, state, staging, &mut drafts);
        self.classify_python_verification(op, staging, &mut drafts);
        drafts
    }

    fn classify_preconditions(&self, op: &Operation, staging: &Staging, out: &mut Vec<ConflictDraft>) {
        let target = op.target.symbol_id.as_str();
        for precondition in &op.preconditions {
            match precondition {
                Precondition::SymbolExists => {
                    if !staging.symbol_head.contains_key(target) {
                        out.push(ConflictDraft {
                            conflict_type: ConflictType::PreconditionFailure,
                            target: target.to_string(),
                            reason: format!("required symbol {target} does not exist"),
                            ops: vec![op.id.clone()],
                        });
                    }
                }
                Precondition::SignatureHash { value } => {
                    // The hash derived from actual staged file content takes
                    // precedence over the declared-hash cache, so legacy ops
                    // that never declared symbol_hashes still get a
                    // semantic check.
                    let derived = SymbolId::parse(target).ok().and_then(|symbol| {
                        self.adapters.derived_symbol_hash(
                            &symbol,
                            staging.tree.get(&symbol.path).map(String::as_str),
                        )
                    });
                    let resolved =
                        derived.or_else(|| staging.symbol_hash.get(target).cloned());
                    if resolved.as_deref() != Some(value.as_str()) {
                        let found = resolved.unwrap_or_else(|| "none".to_string());
                        out.push(ConflictDraft {
                            conflict_type: ConflictType::PreconditionFailure,
                            target: target.to_string(),
                            reason: format!(
                                "signature hash mismatch for {target} (expected {value}, found {found})"
                            ),
                            ops: vec![op.id.clone()],
                        });
                    }
                }
            }
        }
    }

    fn classify_semantic_writes(
        &self,
        op: &Operation,
        staging: &Staging,
        out: &mut Vec<ConflictDraft>,
    ) {
        for symbol in &op.writes {
            let Some(head) = staging.symbol_head.get(symbol) else {
                continue;
            };
            if !self.is_ancestor_or_self(head, &op.parents, &staging.local_parents) {
                out.push(ConflictDraft {
                    conflict_type: ConflictType::SemanticWriteConflict,
                    target: symbol.clone(),
                    reason: format!(
                        "concurrent write to {symbol}: head {head} is not an ancestor of the submitted op"
                    ),
                    ops: vec![head.clone(), op.id.clone()],
                });
            }
        }
    }

    fn classify_policy(
        &self,
        op: &Operation,
        state: &StateMeta,
        staging: &Staging,
        out: &mut Vec<ConflictDraft>,
    ) {
        if !state.policy.allow_open_conflicts && staging.has_open_conflicts {
            out.push(ConflictDraft {
                conflict_type: ConflictType::PolicyConflict,
                target: op.target.symbol_id.clone(),
                reason: format!(
                    "state {} does not accept writes while conflicts are open",
                    state.name
                ),
                ops: vec![op.id.clone()],
            });
        }
    }

    fn classify_python_verification(
        &self,
        op: &Operation,
        staging: &Staging,
        out: &mut Vec<ConflictDraft>,
    ) {
        let Some(path) = op.effect.path(op.target.path_hint.as_deref()) else {
            return;
        };
        if !path.ends_with(".py") {
            return;
        }
        let mut preview = staging.tree.clone();
        self.adapters
            .apply_effect(&mut preview, &op.effect, op.target.path_hint.as_deref());
        let Some(text) = preview.get(path) else {
            return;
        };
        let outcome = self.adapters.parse_python(text);
        if outcome.parse_error {
            out.push(ConflictDraft {
                conflict_type: ConflictType::VerificationConflict,
                target: op.target.symbol_id.clone(),
                reason: "python adapter parse failed after applying operation".to_string(),
                ops: vec![op.id.clone()],
            });
        } else if !outcome.duplicates.is_empty() {
            out.push(ConflictDraft {
                conflict_type: ConflictType::VerificationConflict,
                target: op.target.symbol_id.clone(),
                reason: format!(
                    "duplicate python symbols after applying operation: {}",
                    outcome.duplicates.join(", ")
                ),
                ops: vec![op.id.clone()],
            });
        }
    }
}
