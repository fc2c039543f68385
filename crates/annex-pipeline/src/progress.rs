//! Progress sink wiring step progress into the store and event bus.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use annex_core::{ProgressSink, Store};

/// Sink that mirrors step progress onto the owning item row. Store writes
/// are fire-and-forget so reporting never blocks a transfer loop.
pub struct ItemProgressSink {
    store: Arc<dyn Store>,
    item_id: Uuid,
}

impl ItemProgressSink {
    /// Build a sink for one item.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, item_id: Uuid) -> Self {
        Self { store, item_id }
    }
}

impl ProgressSink for ItemProgressSink {
    fn report(&self, percent: u8, _message: &str) {
        let store = Arc::clone(&self.store);
        let item_id = self.item_id;
        tokio::spawn(async move {
            if let Err(err) = store.set_item_progress(item_id, percent.min(100)).await {
                warn!(error = %err, item_id = %item_id, "failed to persist item progress");
            }
        });
    }
}
