use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::IngestResult;
use crate::transport::base::Transport;
use crate::types::Position;

/// An entry in the in-memory log.
#[derive(Debug, Clone)]
enum Entry {
    Record(Bytes),
    /// Marks the end of the currently readable stream. Consuming it makes one
    /// `next_record` call return `None`, after which reads block again until
    /// more entries arrive.
    EndOfStream,
}

#[derive(Debug)]
struct Inner {
    entries: Vec<Entry>,
    next_index: usize,
    committed: Option<Position>,
    paused: bool,
}

/// In-memory transport for testing and development.
///
/// Positions are indexes into the backing log, so pausing, resuming at a
/// recorded position and re-reading behave like a real position-addressable
/// log. Clones share the same log, which lets a test push records while the
/// consumer owns the transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
    wakeup: Arc<Notify>,
}

impl MemoryTransport {
    /// Creates a new empty transport.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: Vec::new(),
                next_index: 0,
                committed: None,
                paused: false,
            })),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Appends a record to the log and wakes blocked readers.
    pub async fn push_record(&self, payload: impl Into<Bytes>) {
        let mut inner = self.inner.lock().await;
        inner.entries.push(Entry::Record(payload.into()));
        drop(inner);

        self.wakeup.notify_waiters();
    }

    /// Appends an end-of-stream marker to the log.
    ///
    /// The next read that reaches the marker observes end of stream exactly
    /// once; records pushed afterwards are delivered normally.
    pub async fn push_end_of_stream(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.push(Entry::EndOfStream);
        drop(inner);

        self.wakeup.notify_waiters();
    }

    /// Returns `true` if the transport is currently paused.
    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    /// Returns the last committed position, for test assertions.
    pub async fn committed(&self) -> Option<Position> {
        self.inner.lock().await.committed
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    async fn pause(&mut self) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        inner.paused = true;

        Ok(())
    }

    async fn resume(&mut self, from: Position) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        inner.paused = false;
        inner.next_index = from.0 as usize;
        drop(inner);

        self.wakeup.notify_waiters();

        Ok(())
    }

    async fn current_position(&mut self) -> IngestResult<Position> {
        let inner = self.inner.lock().await;

        Ok(Position(inner.next_index as u64))
    }

    async fn committed_position(&mut self) -> IngestResult<Option<Position>> {
        let inner = self.inner.lock().await;

        Ok(inner.committed)
    }

    async fn next_record(&mut self) -> IngestResult<Option<(Position, Bytes)>> {
        loop {
            // Register for wakeups before checking state so a concurrent push
            // between the check and the await is not missed.
            let notified = self.wakeup.notified();

            {
                let mut inner = self.inner.lock().await;
                if !inner.paused && inner.next_index < inner.entries.len() {
                    let index = inner.next_index;
                    inner.next_index += 1;

                    match inner.entries[index].clone() {
                        Entry::Record(payload) => {
                            return Ok(Some((Position(index as u64), payload)));
                        }
                        Entry::EndOfStream => return Ok(None),
                    }
                }
            }

            notified.await;
        }
    }

    async fn commit_position(&mut self, position: Position) -> IngestResult<()> {
        let mut inner = self.inner.lock().await;
        inner.committed = Some(position);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_records_in_order_with_positions() {
        let mut transport = MemoryTransport::new();
        transport.push_record(&b"one"[..]).await;
        transport.push_record(&b"two"[..]).await;

        let (first_position, first) = transport.next_record().await.unwrap().unwrap();
        let (second_position, second) = transport.next_record().await.unwrap().unwrap();

        assert_eq!(first_position, Position(0));
        assert_eq!(first, Bytes::from_static(b"one"));
        assert_eq!(second_position, Position(1));
        assert_eq!(second, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn end_of_stream_is_observed_once() {
        let mut transport = MemoryTransport::new();
        transport.push_end_of_stream().await;
        transport.push_record(&b"after"[..]).await;

        assert!(transport.next_record().await.unwrap().is_none());

        let (_, payload) = transport.next_record().await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"after"));
    }

    #[tokio::test]
    async fn resume_replays_from_the_requested_position() {
        let mut transport = MemoryTransport::new();
        transport.push_record(&b"one"[..]).await;
        transport.push_record(&b"two"[..]).await;

        transport.next_record().await.unwrap();
        transport.next_record().await.unwrap();

        transport.resume(Position(1)).await.unwrap();

        let (position, payload) = transport.next_record().await.unwrap().unwrap();
        assert_eq!(position, Position(1));
        assert_eq!(payload, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_push() {
        let mut transport = MemoryTransport::new();
        let writer = transport.clone();

        let reader = tokio::spawn(async move { transport.next_record().await });

        writer.push_record(&b"late"[..]).await;

        let (_, payload) = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"late"));
    }
}
