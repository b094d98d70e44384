#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Snapshot payloads held per channel; a slow subscriber drops intermediate
/// snapshots but never sees them out of order, and every payload is a
/// complete snapshot, so loss is harmless.
const CHANNEL_CAPACITY: usize = 16;

/// Bounded broadcast fan-out of `state_update` snapshot payloads, one
/// channel per state.
#[derive(Debug, Default)]
pub struct EventHub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, state: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|err| err.into_inner());
        channels
            .entry(state.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn publish(&self, state: &str, payload: String) {
        // No subscribers is fine; the next connection starts from a fresh
        // initial snapshot anyway.
        let _ = self.sender(state).send(payload);
    }

    pub fn subscribe(&self, state: &str) -> broadcast::Receiver<String> {
        self.sender(state).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_payloads_reach_subscribers_in_order() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("main");
        hub.publish("main", "one".to_string());
        hub.publish("main", "two".to_string());
        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn channels_are_isolated_per_state() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe("main");
        hub.publish("other", "noise".to_string());
        hub.publish("main", "signal".to_string());
        assert_eq!(rx.recv().await.unwrap(), "signal");
    }
}
