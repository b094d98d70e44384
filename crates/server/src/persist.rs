#![forbid(unsafe_code)]

use forge_engine::Engine;
use forge_storage::SnapshotStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

/// Debounce window between a nudge and the snapshot write.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Handle the request path uses to schedule a snapshot. Nudges are cheap
/// and coalesce; the writer task owns the store and never blocks writers.
#[derive(Clone, Debug)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl PersistHandle {
    pub fn nudge(&self) {
        let _ = self.tx.send(());
    }

    /// A handle whose nudges go nowhere; used by in-process tests.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Write-behind persister: waits out the debounce window after the first
/// nudge, drains everything that piled up meanwhile, then serializes the
/// engine under a read lock and saves. Writes racing a save are covered by
/// their own later nudge.
pub fn spawn(engine: Arc<RwLock<Engine>>, mut store: Box<dyn SnapshotStore>) -> PersistHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
            let doc = engine.read().await.snapshot();
            if let Err(err) = store.save(&doc) {
                tracing::error!("snapshot save failed: {err}");
            }
        }
    });
    PersistHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::adapter::Adapters;
    use forge_storage::MemoryStore;

    #[tokio::test]
    async fn nudges_coalesce_into_one_save() {
        let engine = Arc::new(RwLock::new(Engine::new(Adapters::with_fallback_parser())));
        let handle = spawn(engine.clone(), Box::new(MemoryStore::new()));
        handle.nudge();
        handle.nudge();
        handle.nudge();
        // Just exercising the task; the store contents are checked through
        // the engine round-trip tests.
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
