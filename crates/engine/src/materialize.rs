#![forbid(unsafe_code)]

use crate::Engine;
use std::collections::{BTreeMap, BTreeSet};

impl Engine {
    /// Deterministic tree rendering: fold the base lineage first, then this
    /// state's accepted ops in canonical order. Unknown states and
    /// `base_state` cycles render as empty trees. The result never includes
    /// uncommitted change-set staging.
    pub fn materialize(&self, state: &str) -> BTreeMap<String, String> {
        let mut visiting = BTreeSet::new();
        self.materialize_inner(state, &mut visiting)
    }

    fn materialize_inner(
        &self,
        state: &str,
        visiting: &mut BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let Some(meta) = self.states.get(state) else {
            return BTreeMap::new();
        };
        if !visiting.insert(state.to_string()) {
            return BTreeMap::new();
        }

        let mut tree = match &meta.base_state {
            Some(base) => self.materialize_inner(base, visiting),
            None => BTreeMap::new(),
        };
        for op_id in self.ops_for_state(state) {
            let Some(op) = self.ops.get(op_id) else {
                continue;
            };
            self.adapters
                .apply_effect(&mut tree, &op.effect, op.target.path_hint.as_deref());
        }
        tree
    }
}
