#![forbid(unsafe_code)]

use crate::change::ChangeSetRecord;
use crate::conflict::Conflict;
use crate::op::Operation;
use crate::state::StateMeta;
use serde::{Deserialize, Serialize};

/// The single JSON document the engine persists. Derived indexes are not
/// stored; they are rebuilt on load. Legacy camelCase sequence keys are
/// accepted on load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    #[serde(default)]
    pub sequence: u64,
    #[serde(default, alias = "conflictSequence")]
    pub conflict_sequence: u64,
    #[serde(default, alias = "changeSetSequence")]
    pub change_set_sequence: u64,
    #[serde(default)]
    pub ops: Vec<Operation>,
    #[serde(default)]
    pub change_sets: Vec<ChangeSetRecord>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub states: Vec<StateMeta>,
}
