#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_STATE: &str = "main";
pub const STRICT_STATE: &str = "prod";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePolicy {
    pub allow_open_conflicts: bool,
    #[serde(default)]
    pub required_checks: Vec<String>,
    #[serde(default)]
    pub required_human_approvals: u32,
}

impl StatePolicy {
    pub fn permissive() -> Self {
        Self {
            allow_open_conflicts: true,
            required_checks: Vec::new(),
            required_human_approvals: 0,
        }
    }

    pub fn strict() -> Self {
        Self {
            allow_open_conflicts: false,
            required_checks: Vec::new(),
            required_human_approvals: 1,
        }
    }

    /// `prod` gets the strict default, everything else the permissive one.
    pub fn default_for(name: &str) -> Self {
        if name == STRICT_STATE {
            Self::strict()
        } else {
            Self::permissive()
        }
    }
}

/// Named causal DAG head plus acceptance policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_state: Option<String>,
    /// The base state's heads captured at creation time; never re-synced.
    #[serde(default)]
    pub base_heads: Vec<String>,
    /// Minimal antichain of op ids with no accepted descendants, sorted.
    #[serde(default)]
    pub heads: Vec<String>,
    pub policy: StatePolicy,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StateMeta {
    pub fn new(name: &str, now_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            base_state: None,
            base_heads: Vec::new(),
            heads: Vec::new(),
            policy: StatePolicy::default_for(name),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Heads maintenance on acceptance: drop the op's parents from the
    /// antichain, insert the op itself.
    pub fn absorb_accepted(&mut self, op_id: &str, parents: &[String], now_ms: i64) {
        self.heads.retain(|head| !parents.contains(head));
        if !self.heads.iter().any(|head| head == op_id) {
            self.heads.push(op_id.to_string());
        }
        self.heads.sort();
        self.updated_at = now_ms;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl fmt::Display for StateNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "state name must not be empty"),
            Self::TooLong => write!(f, "state name must be at most 128 chars"),
            Self::InvalidFirstChar => write!(f, "state name must start with an alphanumeric char"),
            Self::InvalidChar { ch, index } => {
                write!(f, "state name has invalid char {ch:?} at index {index}")
            }
        }
    }
}

impl std::error::Error for StateNameError {}

/// Alphanumeric first char, then alphanumerics plus `. _ / -`; names like
/// `ws/alice` are valid.
pub fn validate_state_name(value: &str) -> Result<(), StateNameError> {
    if value.is_empty() {
        return Err(StateNameError::Empty);
    }
    if value.len() > 128 {
        return Err(StateNameError::TooLong);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            if !ch.is_ascii_alphanumeric() {
                return Err(StateNameError::InvalidFirstChar);
            }
            continue;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-') {
            continue;
        }
        return Err(StateNameError::InvalidChar { ch, index });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies() {
        assert!(StatePolicy::default_for("main").allow_open_conflicts);
        assert!(!StatePolicy::default_for("prod").allow_open_conflicts);
        assert_eq!(StatePolicy::default_for("prod").required_human_approvals, 1);
    }

    #[test]
    fn heads_form_an_antichain() {
        let mut state = StateMeta::new("main", 0);
        state.absorb_accepted("op_a", &[], 1);
        assert_eq!(state.heads, vec!["op_a".to_string()]);
        state.absorb_accepted("op_b", &["op_a".to_string()], 2);
        assert_eq!(state.heads, vec!["op_b".to_string()]);
        state.absorb_accepted("op_c", &[], 3);
        assert_eq!(state.heads, vec!["op_b".to_string(), "op_c".to_string()]);
        assert_eq!(state.updated_at, 3);
    }

    #[test]
    fn state_name_validation() {
        assert_eq!(validate_state_name("").unwrap_err(), StateNameError::Empty);
        assert_eq!(
            validate_state_name("/abs").unwrap_err(),
            StateNameError::InvalidFirstChar
        );
        assert!(matches!(
            validate_state_name("ws alice").unwrap_err(),
            StateNameError::InvalidChar { ch: ' ', .. }
        ));
        assert!(validate_state_name("ws/alice").is_ok());
        assert!(validate_state_name("main").is_ok());
    }
}
