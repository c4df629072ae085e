use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for one position-addressable message channel.
///
/// The consumer reads two channels with this shape: the control channel carrying
/// snapshot lifecycle messages and the data channel carrying change records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    /// Broker addresses of the message transport.
    pub brokers: Vec<String>,
    /// Topic the channel reads from.
    pub topic: String,
}

impl ChannelConfig {
    /// Validates the [`ChannelConfig`].
    ///
    /// `name` identifies the channel in the error, since the same shape is used for
    /// both the control and the data channel.
    pub fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.brokers.is_empty() {
            return Err(ValidationError::ChannelBrokersEmpty(name));
        }

        if self.topic.trim().is_empty() {
            return Err(ValidationError::ChannelTopicEmpty(name));
        }

        Ok(())
    }
}
