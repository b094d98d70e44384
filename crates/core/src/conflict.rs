#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const CONFLICT_ID_PREFIX: &str = "conf_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    SemanticWriteConflict,
    PreconditionFailure,
    PolicyConflict,
    VerificationConflict,
}

impl ConflictType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SemanticWriteConflict => "semantic_write_conflict",
            Self::PreconditionFailure => "precondition_failure",
            Self::PolicyConflict => "policy_conflict",
            Self::VerificationConflict => "verification_conflict",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

/// Durable record of a rejected op with a structured cause. A conflict is
/// only ever mutated by the resolution path, which flips `status` and stamps
/// `resolved_at` / `resolved_by`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub state: String,
    /// The colliding op ids: the existing head first when applicable, the
    /// incoming op last.
    pub ops: Vec<String>,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub target: String,
    pub reason: String,
    pub status: ConflictStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Conflict {
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_type_serializes_snake_case() {
        let value = serde_json::to_value(ConflictType::SemanticWriteConflict).unwrap();
        assert_eq!(value, "semantic_write_conflict");
    }

    #[test]
    fn conflict_serde_round_trip() {
        let conflict = Conflict {
            id: "conf_1".to_string(),
            state: "main".to_string(),
            ops: vec!["op_a".to_string(), "op_b".to_string()],
            conflict_type: ConflictType::PreconditionFailure,
            target: "sym://text/a.txt#document".to_string(),
            reason: "signature hash mismatch".to_string(),
            status: ConflictStatus::Open,
            created_at: 1,
            resolved_at: None,
            resolved_by: None,
        };
        let value = serde_json::to_value(&conflict).unwrap();
        assert_eq!(value["type"], "precondition_failure");
        assert_eq!(value["status"], "open");
        let back: Conflict = serde_json::from_value(value).unwrap();
        assert_eq!(back, conflict);
    }
}
