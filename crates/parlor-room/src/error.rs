//! Error types for the room runtime.

use parlor_protocol::{RoomId, SessionId};

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room is disposing and accepts no new seats or joins.
    #[error("room {0} is disposing")]
    Disposing(RoomId),

    /// The room is at capacity (connected clients plus unconsumed seats).
    #[error("room {0} is full")]
    Full(RoomId),

    /// No unconsumed seat reservation exists for this session.
    #[error("no reserved seat for session {0}")]
    SeatNotReserved(SessionId),

    /// The reconnection token is unknown, already used, or expired.
    #[error("invalid or expired reconnection token")]
    InvalidReconnectionToken,

    /// `on_auth` rejected the client.
    #[error("auth rejected: {0}")]
    AuthRejected(String),

    /// A malformed frame or a message with no registered handler.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A method name outside the room's whitelisted dispatcher.
    #[error("unknown room method {0:?}")]
    UnknownMethod(String),

    /// The room's command channel is closed (room gone or overloaded).
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// A failure raised by user room code.
    #[error("{0}")]
    App(String),
}

impl RoomError {
    /// Shorthand for user-code failures inside hooks and handlers.
    pub fn app(message: impl Into<String>) -> Self {
        Self::App(message.into())
    }
}
