//! Typed control messages and their wire decoding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::snapshot::window::{TransactionWindow, TxId};

/// Identifier of one snapshot transfer, assigned by the source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(value: &str) -> Self {
        SnapshotId(value.to_owned())
    }
}

/// Describes how one destination table's bulk-loaded data is staged.
///
/// The consumer never interprets this beyond handing it to the snapshot loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Name of the staging table holding the bulk-loaded rows.
    pub temp_table: String,
}

/// A message received on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The source system announces that a snapshot transfer is starting.
    SnapshotInit {
        id: SnapshotId,
        /// Product the snapshot belongs to; the control channel is shared
        /// between products.
        product: String,
    },
    /// The announced or in-progress transfer must be discarded.
    SnapshotAbort { id: SnapshotId },
    /// The transfer completed, with per-table staging metadata and the
    /// visibility window valid at snapshot completion.
    SnapshotLoaded {
        id: SnapshotId,
        datasets: BTreeMap<String, DatasetMetadata>,
        transaction_info: TransactionWindow,
    },
}

impl ControlMessage {
    /// The snapshot id every control message carries.
    pub fn snapshot_id(&self) -> &SnapshotId {
        match self {
            Self::SnapshotInit { id, .. } => id,
            Self::SnapshotAbort { id } => id,
            Self::SnapshotLoaded { id, .. } => id,
        }
    }

    /// Short name of the message variant, matching the wire `event` value.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SnapshotInit { .. } => "snapshot-init",
            Self::SnapshotAbort { .. } => "snapshot-abort",
            Self::SnapshotLoaded { .. } => "snapshot-loaded",
        }
    }
}

/// Decodes and schema-checks a raw control-channel payload.
///
/// Every message must declare a string `event` and `snapshot-id`; additional
/// required fields are enforced per variant. All failures are
/// [`ErrorKind::MalformedControlMessage`]: the caller logs and drops the
/// message, decoding never crashes the driver. Decoding is pure.
pub fn parse_control_message(raw: &[u8]) -> IngestResult<ControlMessage> {
    let value: Value = serde_json::from_slice(raw).map_err(|err| {
        ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Control message is not valid JSON",
            String::from_utf8_lossy(raw),
            source: err
        )
    })?;

    let Some(object) = value.as_object() else {
        return Err(ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Control message is not a JSON object",
            value
        ));
    };

    let event = require_str(object, "event")?;
    let id = SnapshotId(require_str(object, "snapshot-id")?.to_owned());

    match event {
        "snapshot-init" => Ok(ControlMessage::SnapshotInit {
            id,
            product: require_str(object, "product")?.to_owned(),
        }),
        "snapshot-abort" => Ok(ControlMessage::SnapshotAbort { id }),
        "snapshot-loaded" => Ok(ControlMessage::SnapshotLoaded {
            id,
            datasets: parse_datasets(require_object(object, "datasets")?)?,
            transaction_info: parse_transaction_info(require_object(object, "transaction-info")?)?,
        }),
        other => Err(ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Control message has an unknown event type",
            other
        )),
    }
}

/// Parses the `datasets` map of a `snapshot-loaded` message.
fn parse_datasets(object: &Map<String, Value>) -> IngestResult<BTreeMap<String, DatasetMetadata>> {
    let mut datasets = BTreeMap::new();

    for (table, entry) in object {
        let Some(entry) = entry.as_object() else {
            return Err(ingest_error!(
                ErrorKind::MalformedControlMessage,
                "Dataset entry is not a JSON object",
                table
            ));
        };

        let temp_table = require_str(entry, "temp_table")?.to_owned();
        datasets.insert(table.clone(), DatasetMetadata { temp_table });
    }

    Ok(datasets)
}

/// Parses the `transaction-info` window of a `snapshot-loaded` message.
fn parse_transaction_info(object: &Map<String, Value>) -> IngestResult<TransactionWindow> {
    let xmin = require_tx_id(object, "xmin")?;
    let xmax = require_tx_id(object, "xmax")?;

    let Some(raw_list) = object.get("xip-list").and_then(Value::as_array) else {
        return Err(ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Transaction info is missing a numeric `xip-list` array"
        ));
    };

    let mut xip_list = Vec::with_capacity(raw_list.len());
    for entry in raw_list {
        xip_list.push(as_tx_id(entry).ok_or_else(|| {
            ingest_error!(
                ErrorKind::MalformedControlMessage,
                "Transaction info `xip-list` entry is not a transaction id",
                entry
            )
        })?);
    }

    Ok(TransactionWindow::new(xmin, xmax, xip_list))
}

/// Extracts a required string field.
fn require_str<'a>(object: &'a Map<String, Value>, field: &'static str) -> IngestResult<&'a str> {
    object.get(field).and_then(Value::as_str).ok_or_else(|| {
        ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Control message is missing a required string field",
            field
        )
    })
}

/// Extracts a required object field.
fn require_object<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> IngestResult<&'a Map<String, Value>> {
    object.get(field).and_then(Value::as_object).ok_or_else(|| {
        ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Control message is missing a required object field",
            field
        )
    })
}

/// Extracts a required transaction-id field.
fn require_tx_id(object: &Map<String, Value>, field: &'static str) -> IngestResult<TxId> {
    object.get(field).and_then(as_tx_id).ok_or_else(|| {
        ingest_error!(
            ErrorKind::MalformedControlMessage,
            "Transaction info is missing a numeric transaction-id field",
            field
        )
    })
}

/// Interprets a JSON value as a 32-bit transaction id.
fn as_tx_id(value: &Value) -> Option<TxId> {
    let raw = value.as_u64()?;
    u32::try_from(raw).ok().map(TxId)
}
