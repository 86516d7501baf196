//! Error types for the presence layer.

/// Errors that can occur in presence operations.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// The presence instance has been shut down.
    #[error("presence is shut down")]
    Shutdown,

    /// The backing store rejected or failed the operation.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Reading or writing a dev-mode snapshot failed.
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot or stored value failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur in IPC request/reply calls.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// No reply arrived within the deadline. The reply channel has been
    /// unsubscribed; a late reply is dropped silently.
    #[error("ipc call {method:?} on {topic:?} timed out")]
    Timeout { topic: String, method: String },

    /// The remote handler failed; carries its message string only.
    #[error("remote error: {0}")]
    Remote(String),

    /// The reply subscription closed before any reply arrived.
    #[error("ipc reply channel closed")]
    ChannelClosed,

    /// A request or reply frame failed to (de)serialize.
    #[error("malformed ipc frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// The underlying presence operation failed.
    #[error(transparent)]
    Presence(#[from] PresenceError),
}
