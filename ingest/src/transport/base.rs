use std::future::Future;

use bytes::Bytes;

use crate::error::IngestResult;
use crate::types::Position;

/// A position-addressable log the consumer reads a channel from.
///
/// Implementations wrap the deployment's message transport (one subscription
/// per channel). The consumer core only relies on the operations below; offset
/// management, partition assignment and reconnection live behind them.
///
/// Durability of "where we are" is delegated to [`Transport::commit_position`]:
/// the driver only commits positions for records that have passed through the
/// state machine, so a crash-restart resumes at a consistent phase instead of
/// silently skipping the pause/catch-up logic.
pub trait Transport {
    /// Stops delivering records until [`Transport::resume`] is called.
    ///
    /// A control instruction to the transport, not a blocking call; the
    /// subscription stays alive (heartbeats included) while paused.
    fn pause(&mut self) -> impl Future<Output = IngestResult<()>> + Send;

    /// Resumes delivery starting at the given position.
    fn resume(&mut self, from: Position) -> impl Future<Output = IngestResult<()>> + Send;

    /// The position of the next record that would be delivered.
    fn current_position(&mut self) -> impl Future<Output = IngestResult<Position>> + Send;

    /// The last committed position, if any progress was ever committed.
    fn committed_position(&mut self)
    -> impl Future<Output = IngestResult<Option<Position>>> + Send;

    /// Delivers the next record, waiting until one is available.
    ///
    /// Returns `None` when the readable stream is exhausted (end of stream);
    /// further calls may block again once new records arrive.
    ///
    /// Must be cancellation safe: the driver races this call against other
    /// inputs, and a cancelled call must not discard a record.
    fn next_record(&mut self)
    -> impl Future<Output = IngestResult<Option<(Position, Bytes)>>> + Send;

    /// Durably records the position reading should resume from after a restart.
    ///
    /// Callers commit the position after the last processed record, so the
    /// committed position is always safe to pass to [`Transport::resume`].
    fn commit_position(&mut self, position: Position)
    -> impl Future<Output = IngestResult<()>> + Send;
}
