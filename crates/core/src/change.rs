#![forbid(unsafe_code)]

use crate::hash::digest20;
use crate::op::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CHANGE_SET_ID_PREFIX: &str = "cs_";

/// Atomic submission unit: one or more ops sharing a state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub state: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub ops: Vec<Operation>,
}

impl ChangeSet {
    /// Content-addressed id over state, metadata and the (normalized) ops.
    pub fn derive_id(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(object) = value.as_object_mut() {
            object.remove("id");
        }
        format!("{CHANGE_SET_ID_PREFIX}{}", digest20(&value))
    }

    /// Change-set level shape check; per-op shapes are judged during
    /// evaluation so failures become recorded rejections.
    pub fn validate(&self) -> Result<(), String> {
        if self.state.trim().is_empty() {
            return Err("change set state must not be empty".to_string());
        }
        if self.ops.is_empty() {
            return Err("change set must contain at least one op".to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    Accepted,
    Conflicted,
    Rejected,
}

impl ChangeSetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Conflicted => "conflicted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpOutcome {
    Accepted,
    Conflicted,
    Rejected,
    Skipped,
}

impl OpOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Conflicted => "conflicted",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: String,
    pub status: OpOutcome,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpResult {
    pub fn new(op_id: impl Into<String>, status: OpOutcome) -> Self {
        Self {
            op_id: op_id.into(),
            status,
            duplicate: false,
            conflict_ids: Vec::new(),
            error: None,
        }
    }
}

/// Immutable audit row persisted for every recorded submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetRecord {
    pub id: String,
    pub sequence: u64,
    pub state: String,
    pub status: ChangeSetStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub results: Vec<OpResult>,
    /// Op ids committed to the log (empty unless `status == accepted`).
    #[serde(default)]
    pub accepted: Vec<String>,
    /// Conflict ids recorded by this submission, sorted lexicographically.
    #[serde(default)]
    pub conflicts: Vec<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_set_id_ignores_assigned_id() {
        let mut change = ChangeSet {
            id: String::new(),
            state: "main".to_string(),
            metadata: Map::new(),
            ops: Vec::new(),
        };
        let id = change.derive_id();
        change.id = id.clone();
        assert_eq!(change.derive_id(), id);
        assert!(id.starts_with(CHANGE_SET_ID_PREFIX));
    }

    #[test]
    fn validation_requires_state_and_ops() {
        let change = ChangeSet {
            id: String::new(),
            state: String::new(),
            metadata: Map::new(),
            ops: Vec::new(),
        };
        assert!(change.validate().is_err());
    }

    #[test]
    fn op_result_serialization_drops_defaults() {
        let result = OpResult::new("op_abc", OpOutcome::Accepted);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"op_id": "op_abc", "status": "accepted"}));
    }
}
