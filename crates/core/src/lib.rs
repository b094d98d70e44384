#![forbid(unsafe_code)]

pub mod adapter;
pub mod change;
pub mod conflict;
pub mod hash;
pub mod op;
pub mod python;
pub mod snapshot;
pub mod state;
pub mod symbol;

/// Epoch milliseconds. The single clock used for record timestamps.
pub fn now_ms() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as i64
}
