//! Frame envelope: the binary layout of every client↔room message.
//!
//! Byte 0 of each frame is a protocol code from [`code`]. What follows
//! depends on the code:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────┐
//! │ code │ body                                         │
//! ├──────┼──────────────────────────────────────────────┤
//! │  10  │ JSON { reconnectionToken, serializerId, … }  │
//! │  11  │ JSON { code, message }                       │
//! │  12  │ —                                            │
//! │  13  │ type tag + optional JSON payload             │
//! │  14  │ raw state bytes                              │
//! │  15  │ raw patch bytes                              │
//! │  17  │ type tag + raw bytes                         │
//! │  20  │ utf-8 reconnection token                     │
//! └──────┴──────────────────────────────────────────────┘
//! ```
//!
//! A *type tag* encodes a [`MessageType`]: `0x00` followed by one byte for
//! numeric types, `0x01` followed by a u16 big-endian length and that many
//! utf-8 bytes for string types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FrameError;

/// Protocol codes: byte 0 of every frame. Numeric values are contracted —
/// client SDKs hardcode them.
pub mod code {
    /// S→C: joined a room; carries reconnection token and serializer id.
    pub const JOIN_ROOM: u8 = 10;
    /// S→C: an error with a code and message.
    pub const ERROR: u8 = 11;
    /// S→C: the room is removing this client.
    pub const LEAVE_ROOM: u8 = 12;
    /// Both directions: a typed message with an optional packed payload.
    pub const ROOM_DATA: u8 = 13;
    /// S→C: full serialized room state.
    pub const ROOM_STATE: u8 = 14;
    /// S→C: a state delta produced by the serializer.
    pub const ROOM_STATE_PATCH: u8 = 15;
    /// Both directions: a typed message carrying raw bytes.
    pub const ROOM_DATA_BYTES: u8 = 17;
    /// C→S: resume a held session with a reconnection token.
    pub const RECONNECT: u8 = 20;
}

/// Close codes attached when the server closes a connection.
pub mod close {
    /// The client left voluntarily.
    pub const CONSENTED: u16 = 4000;
    /// The connection was closed because of an error.
    pub const WITH_ERROR: u16 = 4002;
    /// Dev-mode restart; clients should reconnect shortly.
    pub const DEVMODE_RESTART: u16 = 4010;
}

/// Error codes carried in [`Frame::Error`] and matchmaking responses.
pub mod error_code {
    pub const MATCHMAKE_NO_HANDLER: u16 = 4210;
    pub const MATCHMAKE_INVALID_CRITERIA: u16 = 4211;
    pub const MATCHMAKE_INVALID_ROOM_ID: u16 = 4212;
    pub const MATCHMAKE_UNHANDLED: u16 = 4213;
    pub const MATCHMAKE_EXPIRED: u16 = 4214;
    pub const AUTH_FAILED: u16 = 4215;
    pub const APPLICATION_ERROR: u16 = 4216;
    pub const INVALID_PAYLOAD: u16 = 4217;
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The type tag of a ROOM_DATA / ROOM_DATA_BYTES message.
///
/// Either a string (`"move"`) or a small integer — integers save bytes for
/// high-frequency messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageType {
    Index(u8),
    Text(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(n) => write!(f, "#{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        Self::Index(value)
    }
}

impl MessageType {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Index(n) => {
                buf.push(0x00);
                buf.push(*n);
            }
            Self::Text(s) => {
                buf.push(0x01);
                let bytes = s.as_bytes();
                buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                buf.extend_from_slice(bytes);
            }
        }
    }

    /// Decodes a type tag, returning the tag and the number of bytes read.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        match buf.first() {
            Some(0x00) => {
                let n = *buf.get(1).ok_or(FrameError::Truncated)?;
                Ok((Self::Index(n), 2))
            }
            Some(0x01) => {
                if buf.len() < 3 {
                    return Err(FrameError::Truncated);
                }
                let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
                let end = 3 + len;
                if buf.len() < end {
                    return Err(FrameError::Truncated);
                }
                let s = std::str::from_utf8(&buf[3..end])?;
                Ok((Self::Text(s.to_string()), end))
            }
            Some(tag) => Err(FrameError::UnknownTypeTag(*tag)),
            None => Err(FrameError::Truncated),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// JSON body of a [`Frame::JoinRoom`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomBody {
    reconnection_token: String,
    serializer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handshake: Option<Vec<u8>>,
}

/// JSON body of a [`Frame::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// S→C: confirms a join; the client keeps the token for reconnection.
    JoinRoom {
        reconnection_token: String,
        serializer_id: String,
        handshake: Option<Vec<u8>>,
    },

    /// S→C: an error with a contracted code.
    Error { code: u16, message: String },

    /// S→C: the room is removing this client.
    LeaveRoom,

    /// A typed message with an optional JSON payload.
    RoomData {
        message_type: MessageType,
        payload: Option<Value>,
    },

    /// A typed message carrying raw bytes (skips payload encoding).
    RoomDataBytes {
        message_type: MessageType,
        payload: Vec<u8>,
    },

    /// S→C: full serialized state.
    RoomState(Vec<u8>),

    /// S→C: a state delta.
    RoomStatePatch(Vec<u8>),

    /// C→S: resume a held session.
    Reconnect { token: String },
}

impl Frame {
    /// Serializes the frame into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        match self {
            Self::JoinRoom {
                reconnection_token,
                serializer_id,
                handshake,
            } => {
                buf.push(code::JOIN_ROOM);
                let body = JoinRoomBody {
                    reconnection_token: reconnection_token.clone(),
                    serializer_id: serializer_id.clone(),
                    handshake: handshake.clone(),
                };
                buf.extend_from_slice(&serde_json::to_vec(&body)?);
            }
            Self::Error { code: c, message } => {
                buf.push(code::ERROR);
                let body = ErrorBody {
                    code: *c,
                    message: message.clone(),
                };
                buf.extend_from_slice(&serde_json::to_vec(&body)?);
            }
            Self::LeaveRoom => buf.push(code::LEAVE_ROOM),
            Self::RoomData {
                message_type,
                payload,
            } => {
                buf.push(code::ROOM_DATA);
                message_type.encode_into(&mut buf);
                if let Some(payload) = payload {
                    buf.extend_from_slice(&serde_json::to_vec(payload)?);
                }
            }
            Self::RoomDataBytes {
                message_type,
                payload,
            } => {
                buf.push(code::ROOM_DATA_BYTES);
                message_type.encode_into(&mut buf);
                buf.extend_from_slice(payload);
            }
            Self::RoomState(data) => {
                buf.push(code::ROOM_STATE);
                buf.extend_from_slice(data);
            }
            Self::RoomStatePatch(data) => {
                buf.push(code::ROOM_STATE_PATCH);
                buf.extend_from_slice(data);
            }
            Self::Reconnect { token } => {
                buf.push(code::RECONNECT);
                buf.extend_from_slice(token.as_bytes());
            }
        }
        Ok(buf)
    }

    /// Parses a frame from its wire form.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (&first, rest) = data.split_first().ok_or(FrameError::Truncated)?;
        match first {
            code::JOIN_ROOM => {
                let body: JoinRoomBody = serde_json::from_slice(rest)?;
                Ok(Self::JoinRoom {
                    reconnection_token: body.reconnection_token,
                    serializer_id: body.serializer_id,
                    handshake: body.handshake,
                })
            }
            code::ERROR => {
                let body: ErrorBody = serde_json::from_slice(rest)?;
                Ok(Self::Error {
                    code: body.code,
                    message: body.message,
                })
            }
            code::LEAVE_ROOM => Ok(Self::LeaveRoom),
            code::ROOM_DATA => {
                let (message_type, read) = MessageType::decode_from(rest)?;
                let remainder = &rest[read..];
                let payload = if remainder.is_empty() {
                    None
                } else {
                    Some(serde_json::from_slice(remainder)?)
                };
                Ok(Self::RoomData {
                    message_type,
                    payload,
                })
            }
            code::ROOM_DATA_BYTES => {
                let (message_type, read) = MessageType::decode_from(rest)?;
                Ok(Self::RoomDataBytes {
                    message_type,
                    payload: rest[read..].to_vec(),
                })
            }
            code::ROOM_STATE => Ok(Self::RoomState(rest.to_vec())),
            code::ROOM_STATE_PATCH => Ok(Self::RoomStatePatch(rest.to_vec())),
            code::RECONNECT => Ok(Self::Reconnect {
                token: std::str::from_utf8(rest)?.to_string(),
            }),
            other => Err(FrameError::UnknownCode(other)),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
