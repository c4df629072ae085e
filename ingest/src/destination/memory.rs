use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::conversions::record::ChangeRecord;
use crate::destination::base::Destination;
use crate::error::IngestResult;
use crate::snapshot::window::TxId;

/// In-memory destination for testing and development.
///
/// Stores all applied change records in arrival order so tests can verify
/// exactly which records survived catch-up filtering.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    changes: Arc<Mutex<Vec<ChangeRecord>>>,
}

impl MemoryDestination {
    /// Creates a new empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all applied change records.
    pub async fn changes(&self) -> Vec<ChangeRecord> {
        self.changes.lock().await.clone()
    }

    /// Returns the transaction ids of all applied change records, in order.
    pub async fn applied_xids(&self) -> Vec<TxId> {
        self.changes
            .lock()
            .await
            .iter()
            .map(|change| change.xid)
            .collect()
    }

    /// Clears all stored records.
    pub async fn clear(&self) {
        self.changes.lock().await.clear();
    }
}

impl Destination for MemoryDestination {
    async fn write_changes(&self, changes: Vec<ChangeRecord>) -> IngestResult<()> {
        let mut stored = self.changes.lock().await;

        info!("writing a batch of {} change records", changes.len());

        stored.extend(changes);

        Ok(())
    }
}
