//! Error types for frame encoding and decoding.

/// Errors produced while decoding (or encoding) a protocol frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is empty or ends in the middle of a field.
    #[error("truncated frame")]
    Truncated,

    /// Byte 0 does not match any known protocol code.
    #[error("unknown protocol code {0}")]
    UnknownCode(u8),

    /// An unknown message-type tag byte (neither number nor string).
    #[error("unknown message type tag {0}")]
    UnknownTypeTag(u8),

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in frame: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A JSON body failed to encode or decode.
    #[error("malformed frame body: {0}")]
    Json(#[from] serde_json::Error),
}
