use std::collections::BTreeMap;
use std::future::Future;

use crate::control::message::{DatasetMetadata, SnapshotId};
use crate::error::IngestResult;

/// Executor that moves a snapshot's staged datasets into the destination store.
///
/// Implementations own the actual data movement (swapping staged tables into
/// place, bulk inserts); the consumer core only decides when to invoke it. A
/// load may be long-running and is always run inside a cancellable task, so
/// implementations must tolerate being dropped mid-flight without corrupting
/// the destination.
pub trait SnapshotLoader {
    /// Applies the staged datasets of the given snapshot to the destination.
    fn load(
        &self,
        id: &SnapshotId,
        datasets: &BTreeMap<String, DatasetMetadata>,
    ) -> impl Future<Output = IngestResult<()>> + Send;
}
