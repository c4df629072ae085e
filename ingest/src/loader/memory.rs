use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::control::message::{DatasetMetadata, SnapshotId};
use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::loader::base::SnapshotLoader;

#[derive(Debug, Default)]
struct Inner {
    invocations: Vec<SnapshotId>,
    completions: Vec<SnapshotId>,
    fail_loads: bool,
    delay: Option<Duration>,
}

/// In-memory snapshot loader for testing and development.
///
/// Records every invocation and completion so tests can assert that the loader
/// ran exactly once per accepted snapshot. Can be configured to fail or to take
/// a while, which is how abort races and cancellation are exercised.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotLoader {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySnapshotLoader {
    /// Creates a new loader that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent load report failure.
    pub async fn fail_loads(&self) {
        self.inner.lock().await.fail_loads = true;
    }

    /// Delays every subsequent load, simulating a long-running bulk transfer.
    pub async fn delay_loads(&self, delay: Duration) {
        self.inner.lock().await.delay = Some(delay);
    }

    /// Snapshot ids the loader was invoked for.
    pub async fn invocations(&self) -> Vec<SnapshotId> {
        self.inner.lock().await.invocations.clone()
    }

    /// Snapshot ids whose load ran to completion (successfully or not).
    pub async fn completions(&self) -> Vec<SnapshotId> {
        self.inner.lock().await.completions.clone()
    }
}

impl SnapshotLoader for MemorySnapshotLoader {
    async fn load(
        &self,
        id: &SnapshotId,
        datasets: &BTreeMap<String, DatasetMetadata>,
    ) -> IngestResult<()> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.invocations.push(id.clone());
            inner.delay
        };

        info!(
            "loading snapshot '{}' with {} staged datasets",
            id,
            datasets.len()
        );

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.completions.push(id.clone());

        if inner.fail_loads {
            return Err(ingest_error!(
                ErrorKind::SnapshotLoadFailed,
                "Snapshot load failed",
                format!("memory loader was configured to fail snapshot '{id}'")
            ));
        }

        Ok(())
    }
}
