//! Parsing of data-channel change records.
//!
//! The data channel carries the logical-decoding output of the source database
//! as JSON, one message per record: transaction framing (`begin`/`commit`) and
//! row changes. The consumer core only needs the transaction id for catch-up
//! filtering; row payloads are passed through to the destination untouched.

use serde::Deserialize;
use serde_json::Value;

use crate::error::IngestResult;
use crate::snapshot::window::TxId;

/// A row-change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A single row change belonging to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeRecord {
    /// Id of the transaction this change belongs to.
    pub xid: TxId,
    /// Destination table the change applies to.
    pub table: String,
    /// Row operation.
    pub op: ChangeOp,
    /// Row payload, opaque to the consumer core.
    pub data: Value,
}

/// One event read from the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A transaction started emitting changes.
    Begin { xid: TxId },
    /// A transaction committed. Drives catch-up resolution.
    Commit { xid: TxId },
    /// A row change.
    Change(ChangeRecord),
}

impl StreamEvent {
    /// Id of the transaction this event belongs to.
    pub fn xid(&self) -> TxId {
        match self {
            Self::Begin { xid } | Self::Commit { xid } => *xid,
            Self::Change(record) => record.xid,
        }
    }
}

/// Raw wire shape of a data-channel record.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum RawStreamEvent {
    Begin {
        xid: TxId,
    },
    Commit {
        xid: TxId,
    },
    Change {
        xid: TxId,
        table: String,
        op: ChangeOp,
        data: Value,
    },
}

/// Parses a raw data-channel payload into a [`StreamEvent`].
///
/// A malformed record is a poison message, not a reason to wedge the consumer:
/// the caller logs the failure, skips the record and keeps the position moving.
pub fn parse_stream_event(raw: &[u8]) -> IngestResult<StreamEvent> {
    let event = match serde_json::from_slice::<RawStreamEvent>(raw)? {
        RawStreamEvent::Begin { xid } => StreamEvent::Begin { xid },
        RawStreamEvent::Commit { xid } => StreamEvent::Commit { xid },
        RawStreamEvent::Change {
            xid,
            table,
            op,
            data,
        } => StreamEvent::Change(ChangeRecord {
            xid,
            table,
            op,
            data,
        }),
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transaction_framing() {
        let begin = parse_stream_event(br#"{"event":"begin","xid":7}"#).unwrap();
        let commit = parse_stream_event(br#"{"event":"commit","xid":7}"#).unwrap();

        assert_eq!(begin, StreamEvent::Begin { xid: TxId(7) });
        assert_eq!(commit, StreamEvent::Commit { xid: TxId(7) });
    }

    #[test]
    fn parses_row_changes() {
        let raw = br#"{"event":"change","xid":7,"table":"events","op":"insert","data":{"id":1}}"#;

        let event = parse_stream_event(raw).unwrap();

        let StreamEvent::Change(record) = event else {
            panic!("expected a change record");
        };
        assert_eq!(record.xid, TxId(7));
        assert_eq!(record.table, "events");
        assert_eq!(record.op, ChangeOp::Insert);
    }

    #[test]
    fn rejects_unknown_event_kinds() {
        assert!(parse_stream_event(br#"{"event":"truncate","xid":7}"#).is_err());
    }

    #[test]
    fn rejects_records_without_a_transaction_id() {
        assert!(parse_stream_event(br#"{"event":"commit"}"#).is_err());
    }
}
