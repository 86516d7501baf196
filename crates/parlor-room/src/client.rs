//! Client session types and the transport seam.

use std::fmt;

use parlor_protocol::{Frame, SessionId};
use serde_json::Value;
use tokio::sync::mpsc;

/// An outbound item handed to the transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// An encoded protocol frame to deliver.
    Frame(Vec<u8>),
    /// Close the connection with this close code.
    Close(u16),
}

/// The room's handle to a client's connection.
///
/// The transport adapter creates the channel, keeps the receiving half, and
/// drains it into the real connection. Cheap to clone — it's just an
/// `mpsc::UnboundedSender` wrapper. Sends to a gone connection are dropped
/// silently; the transport reports the close separately.
#[derive(Clone)]
pub struct ClientRef {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientRef {
    /// Creates a ref plus the receiver the transport adapter drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Encodes and queues a frame.
    pub fn send_frame(&self, frame: &Frame) {
        match frame.encode() {
            Ok(bytes) => {
                let _ = self.tx.send(Outbound::Frame(bytes));
            }
            Err(error) => {
                tracing::warn!(%error, "dropping unencodable frame");
            }
        }
    }

    /// Queues pre-encoded frame bytes.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(Outbound::Frame(bytes));
    }

    /// Asks the transport to close the connection.
    pub fn close(&self, close_code: u16) {
        let _ = self.tx.send(Outbound::Close(close_code));
    }

    /// Whether the transport is still draining this ref.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRef")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Connection state of a client within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Seat consumed, join sequence in progress.
    Joining,
    /// Fully joined; receives broadcasts and patches.
    Joined,
    /// Rejoined through a reconnection hold; receives broadcasts and patches.
    Reconnected,
    /// Leave in progress; inbound messages are dropped.
    Leaving,
}

/// One client session bound to exactly one room.
#[derive(Debug, Clone)]
pub struct Client {
    pub session_id: SessionId,
    /// Secret the client presents to resume after a drop. Single-use: a
    /// fresh one is minted on every (re)join.
    pub reconnection_token: String,
    /// Auth data from the seat reservation or `on_auth`.
    pub auth: Value,
    /// Free slot for room code to hang per-client data on.
    pub user_data: Value,
    pub state: ClientState,
    pub(crate) transport: ClientRef,
}

impl Client {
    /// Whether broadcasts and patches should reach this client.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Joined | ClientState::Reconnected)
    }

    /// Encodes and queues a frame for this client.
    pub fn send(&self, frame: &Frame) {
        self.transport.send_frame(frame);
    }

    /// Queues pre-encoded frame bytes for this client.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.transport.send_raw(bytes);
    }

    /// Sends an `ERROR` frame.
    pub fn error(&self, error_code: u16, message: &str) {
        self.send(&Frame::Error {
            code: error_code,
            message: message.to_string(),
        });
    }

    /// Asks the transport to close this client's connection.
    pub fn close(&self, close_code: u16) {
        self.transport.close(close_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ref_send_frame_reaches_receiver() {
        let (client_ref, mut rx) = ClientRef::channel();
        client_ref.send_frame(&Frame::LeaveRoom);

        let item = rx.try_recv().unwrap();
        assert_eq!(item, Outbound::Frame(Frame::LeaveRoom.encode().unwrap()));
    }

    #[test]
    fn test_client_ref_close_reaches_receiver() {
        let (client_ref, mut rx) = ClientRef::channel();
        client_ref.close(4000);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(4000));
    }

    #[test]
    fn test_client_ref_send_to_dropped_receiver_is_silent() {
        let (client_ref, rx) = ClientRef::channel();
        drop(rx);
        assert!(!client_ref.is_open());
        client_ref.send_frame(&Frame::LeaveRoom); // must not panic
    }

    #[test]
    fn test_is_active_by_state() {
        let (transport, _rx) = ClientRef::channel();
        let mut client = Client {
            session_id: SessionId::from("s1"),
            reconnection_token: "tok".into(),
            auth: Value::Null,
            user_data: Value::Null,
            state: ClientState::Joining,
            transport,
        };
        assert!(!client.is_active());
        client.state = ClientState::Joined;
        assert!(client.is_active());
        client.state = ClientState::Reconnected;
        assert!(client.is_active());
        client.state = ClientState::Leaving;
        assert!(!client.is_active());
    }
}
