#![forbid(unsafe_code)]

use forge_core::change::ChangeSetStatus;
use forge_core::conflict::ConflictStatus;

/// Ordered event records returned from mutating engine calls. Per state the
/// order is always `op_accepted`* (with `conflict` resolutions after the
/// resolving op), then `change_set`, then `state_update`. The host fans
/// these out; the engine itself never does I/O.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    OpAccepted {
        state: String,
        op_id: String,
    },
    ChangeSet {
        state: String,
        change_set_id: String,
        status: ChangeSetStatus,
    },
    Conflict {
        state: String,
        conflict_id: String,
        status: ConflictStatus,
    },
    StateUpdate {
        state: String,
    },
}

impl EngineEvent {
    pub fn state(&self) -> &str {
        match self {
            Self::OpAccepted { state, .. }
            | Self::ChangeSet { state, .. }
            | Self::Conflict { state, .. }
            | Self::StateUpdate { state } => state,
        }
    }
}
