use std::future::Future;

use crate::conversions::record::ChangeRecord;
use crate::error::IngestResult;

/// The analytical store change records are applied to.
///
/// The consumer hands over records in stream order; everything that reaches
/// [`Destination::write_changes`] has already passed the state machine and,
/// during catch-up, the visibility filter. Implementations should be idempotent
/// where possible since a crash between apply and position commit makes the
/// consumer re-deliver the last records.
pub trait Destination {
    /// Applies change records to the store, in the given order.
    fn write_changes(
        &self,
        changes: Vec<ChangeRecord>,
    ) -> impl Future<Output = IngestResult<()>> + Send;
}
