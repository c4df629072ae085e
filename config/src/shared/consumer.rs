use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{ChannelConfig, ValidationError};

/// Default depth of the queue delivering snapshot load results back into the
/// driver's event loop.
const DEFAULT_LOAD_RESULT_QUEUE_DEPTH: usize = 4;

/// Configuration for the stateful snapshot-aware consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StatefulConsumerConfig {
    /// Product this consumer ingests. Snapshot announcements for other products
    /// sharing the control channel are ignored.
    pub product: String,
    /// Channel carrying snapshot lifecycle control messages.
    pub control_channel: ChannelConfig,
    /// Channel carrying the change record stream.
    pub data_channel: ChannelConfig,
    /// Depth of the queue delivering snapshot load results into the driver loop.
    #[serde(default = "StatefulConsumerConfig::default_load_result_queue_depth")]
    pub load_result_queue_depth: usize,
}

impl StatefulConsumerConfig {
    fn default_load_result_queue_depth() -> usize {
        DEFAULT_LOAD_RESULT_QUEUE_DEPTH
    }

    /// Validates the [`StatefulConsumerConfig`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product.trim().is_empty() {
            return Err(ValidationError::ProductEmpty);
        }

        self.control_channel.validate("control")?;
        self.data_channel.validate("data")?;

        Ok(())
    }
}

impl Config for StatefulConsumerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] =
        &["control_channel.brokers", "data_channel.brokers"];
}
