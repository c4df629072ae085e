//! Stateful, snapshot-aware consumer for change-data-capture streams.
//!
//! The consumer ingests a change stream from a transactional source into an
//! analytical store while supporting an initial bulk snapshot transfer. The
//! consistency-critical piece is the cutover between the bulk-loaded snapshot
//! and the live stream: the [`state`] machine decides which regime the consumer
//! is in, and the [`snapshot`] visibility window decides which streamed records
//! were already captured by the snapshot and must be skipped during catch-up.

pub mod concurrency;
pub mod consumer;
pub mod control;
pub mod conversions;
pub mod destination;
pub mod error;
pub mod loader;
pub mod macros;
pub mod snapshot;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transport;
pub mod types;
