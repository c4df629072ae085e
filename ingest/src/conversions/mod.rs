//! Conversions from wire payloads into typed stream events.

pub mod record;
