//! Unified error type for matchmaking operations.

use parlor_driver::DriverError;
use parlor_presence::{IpcError, PresenceError};
use parlor_protocol::{error_code, RoomId};
use parlor_room::RoomError;

/// Everything a matchmaking call can fail with.
///
/// The external HTTP surface maps these to responses via
/// [`code`](Self::code); IPC timeouts are the only server-side (5xx) class.
#[derive(Debug, thiserror::Error)]
pub enum MatchmakerError {
    /// No handler was registered under this room name.
    #[error("no room handler registered for {0:?}")]
    NoHandler(String),

    /// No available room matched, and the operation may not create one.
    #[error("no available room found for {0:?}")]
    RoomNotFound(String),

    /// `join_by_id` addressed a room that does not exist.
    #[error("room {0} not found")]
    InvalidRoomId(RoomId),

    /// A seat could not be reserved (capacity, lock, or race).
    #[error("seat reservation failed: {0}")]
    SeatReservation(String),

    /// A seat reservation was no longer valid at connect time.
    #[error("seat reservation expired")]
    Expired,

    /// The room's `on_auth` rejected the client.
    #[error("auth failed: {0}")]
    Auth(String),

    /// Room factory or `on_create` failed, or a remote create reported an
    /// error.
    #[error("matchmaking failed: {0}")]
    Matchmaking(String),

    /// This process is draining and takes no new matchmaking requests.
    #[error("process is shutting down")]
    ShuttingDown,

    /// An IPC round trip failed (timeouts here drive health exclusion).
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// The coordination backend failed.
    #[error(transparent)]
    Presence(#[from] PresenceError),

    /// The listing store failed.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A local room operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),
}

impl MatchmakerError {
    /// The contracted error code carried to clients.
    pub fn code(&self) -> u16 {
        match self {
            Self::NoHandler(_) => error_code::MATCHMAKE_NO_HANDLER,
            Self::RoomNotFound(_) => error_code::MATCHMAKE_INVALID_CRITERIA,
            Self::InvalidRoomId(_) => error_code::MATCHMAKE_INVALID_ROOM_ID,
            Self::SeatReservation(_) | Self::Expired => error_code::MATCHMAKE_EXPIRED,
            Self::Auth(_) => error_code::AUTH_FAILED,
            Self::Room(RoomError::AuthRejected(_)) => error_code::AUTH_FAILED,
            Self::Matchmaking(_) | Self::ShuttingDown => error_code::MATCHMAKE_UNHANDLED,
            Self::Ipc(_) | Self::Presence(_) | Self::Driver(_) | Self::Room(_) => {
                error_code::APPLICATION_ERROR
            }
        }
    }

    /// Whether this failure came from an unanswered IPC call.
    pub fn is_ipc_timeout(&self) -> bool {
        matches!(self, Self::Ipc(IpcError::Timeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_contracted() {
        assert_eq!(MatchmakerError::NoHandler("x".into()).code(), 4210);
        assert_eq!(MatchmakerError::RoomNotFound("x".into()).code(), 4211);
        assert_eq!(
            MatchmakerError::InvalidRoomId(RoomId::from("r")).code(),
            4212
        );
        assert_eq!(MatchmakerError::Expired.code(), 4214);
        assert_eq!(MatchmakerError::Auth("no".into()).code(), 4215);
    }

    #[test]
    fn test_is_ipc_timeout() {
        let timeout = MatchmakerError::Ipc(IpcError::Timeout {
            topic: "p:x".into(),
            method: "create_room".into(),
        });
        assert!(timeout.is_ipc_timeout());
        assert!(!MatchmakerError::Expired.is_ipc_timeout());
    }
}
