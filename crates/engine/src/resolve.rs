#![forbid(unsafe_code)]

use crate::submit::SubmitOutcome;
use crate::{Engine, EngineError, EngineEvent};
use forge_core::conflict::Conflict;
use forge_core::op::Operation;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolveOutcome {
    /// The conflict after the attempt; still open when the op was not
    /// accepted.
    pub conflict: Conflict,
    pub submit: SubmitOutcome,
}

impl Engine {
    /// Resolution is an ordinary submission: the resolving op is tagged with
    /// the conflict id and goes through the full pipeline. Acceptance flips
    /// every open conflict the op lists; failure leaves the conflict open
    /// and surfaces the submit outcome.
    pub fn resolve(
        &mut self,
        conflict_id: &str,
        op: Operation,
    ) -> Result<(ResolveOutcome, Vec<EngineEvent>), EngineError> {
        if !self.conflicts.contains_key(conflict_id) {
            return Err(EngineError::UnknownConflict(conflict_id.to_string()));
        }

        let mut op = op;
        if !op.resolves.iter().any(|id| id == conflict_id) {
            op.resolves.push(conflict_id.to_string());
            // The id (if any) was derived without this resolve entry.
            op.id = String::new();
        }

        let (submit, events) = self.submit_ops(vec![op])?;
        let conflict = self
            .conflicts
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConflict(conflict_id.to_string()))?;
        Ok((ResolveOutcome { conflict, submit }, events))
    }
}
