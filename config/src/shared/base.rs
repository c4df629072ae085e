use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The product name the consumer serves cannot be empty.
    #[error("`product` cannot be empty")]
    ProductEmpty,
    /// A channel topic cannot be empty.
    #[error("`{0}` channel topic cannot be empty")]
    ChannelTopicEmpty(&'static str),
    /// A channel needs at least one broker address.
    #[error("`{0}` channel needs at least one broker address")]
    ChannelBrokersEmpty(&'static str),
}
