//! Configuration for the snapshot-aware CDC consumer.
//!
//! Configuration is split between [`shared`] structures, which are serde-deserializable
//! and reused by every deployable that embeds the consumer, and the [`load`] machinery
//! that layers `configuration/` files with environment variable overrides.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
