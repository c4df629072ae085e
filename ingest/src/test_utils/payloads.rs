//! Builders for raw control and data channel payloads.

use bytes::Bytes;
use serde_json::{Value, json};

/// Builds a `snapshot-init` control payload.
pub fn snapshot_init(id: &str, product: &str) -> Bytes {
    to_bytes(json!({
        "event": "snapshot-init",
        "snapshot-id": id,
        "product": product,
    }))
}

/// Builds a `snapshot-abort` control payload.
pub fn snapshot_abort(id: &str) -> Bytes {
    to_bytes(json!({
        "event": "snapshot-abort",
        "snapshot-id": id,
    }))
}

/// Builds a `snapshot-loaded` control payload with one staged dataset per table.
pub fn snapshot_loaded(id: &str, tables: &[&str], xmin: u32, xmax: u32, xips: &[u32]) -> Bytes {
    let datasets: Value = tables
        .iter()
        .map(|table| (table.to_string(), json!({"temp_table": format!("{table}_tmp_{id}")})))
        .collect::<serde_json::Map<String, Value>>()
        .into();

    to_bytes(json!({
        "event": "snapshot-loaded",
        "snapshot-id": id,
        "datasets": datasets,
        "transaction-info": {
            "xmin": xmin,
            "xmax": xmax,
            "xip-list": xips,
        },
    }))
}

/// Builds a `begin` data payload.
pub fn begin(xid: u32) -> Bytes {
    to_bytes(json!({"event": "begin", "xid": xid}))
}

/// Builds a `commit` data payload.
pub fn commit(xid: u32) -> Bytes {
    to_bytes(json!({"event": "commit", "xid": xid}))
}

/// Builds an `insert` change data payload.
pub fn insert(xid: u32, table: &str, data: Value) -> Bytes {
    to_bytes(json!({
        "event": "change",
        "xid": xid,
        "table": table,
        "op": "insert",
        "data": data,
    }))
}

fn to_bytes(value: Value) -> Bytes {
    Bytes::from(value.to_string())
}
