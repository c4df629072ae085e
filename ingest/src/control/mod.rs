//! Control-channel protocol.
//!
//! The source system announces snapshot transfers on a side channel. Messages
//! are decoded and schema-checked here before they reach the state machine.

pub mod message;

pub use message::{ControlMessage, DatasetMetadata, SnapshotId, parse_control_message};
