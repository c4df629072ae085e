//! Core identifier types shared across the consumer.

use std::fmt;

/// Unique identifier for a consumer instance.
pub type ConsumerId = u64;

/// A position in a position-addressable log.
///
/// Positions are opaque to the consumer core beyond their ordering; the
/// transport decides what they mean (offsets, sequence numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub u64);

impl Position {
    /// The earliest addressable position of a log.
    pub const BEGINNING: Position = Position(0);

    /// The position immediately after this one.
    ///
    /// Committing `record_position.next()` makes the record's successor the
    /// resume point, so an already-processed record is not replayed on restart.
    pub fn next(self) -> Position {
        Position(self.0 + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
