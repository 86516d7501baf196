//! Handle to a running room actor, and the events it emits.

use parlor_protocol::{RoomId, SessionId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{ClientRef, RoomError, RoomLifecycle};

/// Commands sent to a room actor through its channel.
///
/// Variants carrying a `oneshot::Sender` are request/reply: the caller
/// awaits the response on that channel.
pub(crate) enum RoomCommand {
    /// Reserve a seat for a session ahead of its transport connection.
    ReserveSeat {
        session_id: SessionId,
        options: Value,
        auth: Value,
        for_reconnection: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Consume a reserved seat: run the join sequence for a connected client.
    Join {
        session_id: SessionId,
        transport: ClientRef,
        reply: oneshot::Sender<Result<JoinedInfo, RoomError>>,
    },

    /// Resume a held session with a reconnection token.
    Reconnect {
        token: String,
        transport: ClientRef,
        reply: oneshot::Sender<Result<JoinedInfo, RoomError>>,
    },

    /// An inbound frame from a client's transport.
    Message { session_id: SessionId, data: Vec<u8> },

    /// The client's transport closed with this code.
    TransportClosed { session_id: SessionId, code: u16 },

    /// Whitelisted string-method dispatch (the IPC surface).
    Call {
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, RoomError>>,
    },

    Lock {
        reply: oneshot::Sender<()>,
    },
    Unlock {
        reply: oneshot::Sender<()>,
    },
    SetPrivate {
        private: bool,
        reply: oneshot::Sender<()>,
    },
    SetMetadata {
        metadata: Value,
        reply: oneshot::Sender<()>,
    },

    /// Remove every client with this close code; the room disposes once
    /// drained. Replies when the drain completed.
    Disconnect {
        code: u16,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Graceful-shutdown step: lock, run `on_before_shutdown`, then drain.
    BeforeShutdown {
        code: u16,
        reply: oneshot::Sender<()>,
    },

    /// Metadata snapshot for listings, debugging and tests.
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Result of a successful join or reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedInfo {
    pub session_id: SessionId,
    pub reconnection_token: String,
}

/// A point-in-time view of a room's externally relevant state.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub room_name: String,
    pub lifecycle: RoomLifecycle,
    /// Connected clients (not counting unconsumed seats).
    pub clients: u32,
    /// Unconsumed seat reservations.
    pub reserved_seats: u32,
    pub max_clients: u32,
    pub locked: bool,
    pub private: bool,
    pub unlisted: bool,
    pub metadata: Value,
}

/// Lifecycle events a room reports to its matchmaker binding.
///
/// The matchmaker applies these to the room's listing and its stats; the
/// room itself never touches either.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Connected-plus-reserved count changed (join, leave, seat reserve or
    /// expiry); carries the lock flag so auto-lock lands in the listing.
    ClientCountChanged { clients: u32, locked: bool },

    /// Explicit lock/unlock.
    LockChanged { locked: bool },

    /// `set_private` toggled.
    VisibilityChanged { private: bool },

    /// `set_metadata` replaced the listing metadata.
    MetadataChanged { metadata: Value },

    /// A client completed the join sequence (CCU accounting).
    Joined { session_id: SessionId },

    /// A client's leave fully completed (CCU accounting). Not emitted while
    /// a reconnection hold is pending.
    Left { session_id: SessionId },

    /// Dispose began: the listing must be removed now.
    Disposing,

    /// Dispose finished: unsubscribe, deregister, decrement room count.
    Disposed,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub(crate) fn new(room_id: RoomId, sender: mpsc::Sender<RoomCommand>) -> Self {
        Self { room_id, sender }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.room_id.clone())
    }

    async fn request<T>(
        &self,
        command: RoomCommand,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, RoomError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| self.unavailable())?;
        reply.await.map_err(|_| self.unavailable())
    }

    /// Reserves a seat; fails when the room is full or disposing.
    pub async fn reserve_seat(
        &self,
        session_id: SessionId,
        options: Value,
        auth: Value,
        for_reconnection: bool,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::ReserveSeat {
                session_id,
                options,
                auth,
                for_reconnection,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    /// Runs the join sequence for a connected client.
    pub async fn join(
        &self,
        session_id: SessionId,
        transport: ClientRef,
    ) -> Result<JoinedInfo, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Join {
                session_id,
                transport,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    /// Resumes a held session with a reconnection token.
    pub async fn reconnect(
        &self,
        token: String,
        transport: ClientRef,
    ) -> Result<JoinedInfo, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Reconnect {
                token,
                transport,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    /// Delivers an inbound frame (fire-and-forget).
    pub async fn send_message(
        &self,
        session_id: SessionId,
        data: Vec<u8>,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Message { session_id, data })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Reports a transport close.
    pub async fn transport_closed(
        &self,
        session_id: SessionId,
        code: u16,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::TransportClosed { session_id, code })
            .await
            .map_err(|_| self.unavailable())
    }

    /// Invokes a whitelisted method by name — the IPC dispatch surface.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Call {
                method: method.to_string(),
                args,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    pub async fn lock(&self) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Lock { reply: tx }, rx).await
    }

    pub async fn unlock(&self) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Unlock { reply: tx }, rx).await
    }

    pub async fn set_private(&self, private: bool) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::SetPrivate { private, reply: tx }, rx)
            .await
    }

    pub async fn set_metadata(&self, metadata: Value) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::SetMetadata { metadata, reply: tx }, rx)
            .await
    }

    /// Removes every client and disposes the room once drained.
    pub async fn disconnect(&self, code: u16) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Disconnect { code, reply: tx }, rx)
            .await?
    }

    /// Graceful-shutdown step for this room.
    pub async fn before_shutdown(&self, code: u16) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::BeforeShutdown { code, reply: tx }, rx)
            .await
    }

    /// Fetches a state snapshot.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Snapshot { reply: tx }, rx).await
    }
}
