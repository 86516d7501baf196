//! Error types for the driver layer.

/// Errors that can occur in listing-store operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The backing store rejected or failed the operation.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A listing failed to (de)serialize.
    #[error("listing serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A coalesced fetch failed; carries the original error's message.
    #[error("listing fetch failed: {0}")]
    Fetch(String),
}
