//! Wire protocol for parlor.
//!
//! This crate defines the "language" that clients and rooms speak:
//!
//! - **Identity types** ([`RoomId`], [`SessionId`], [`ProcessId`]) — opaque
//!   ids that travel on the wire and key every registry in the server.
//! - **Codes** ([`code`], [`close`], [`error_code`]) — the contracted numeric
//!   values for frame types, close reasons and matchmaking errors.
//! - **Frames** ([`Frame`], [`MessageType`]) — the envelope every
//!   client↔room message is wrapped in, with its binary encode/decode.
//!
//! The protocol layer sits below everything else: it knows nothing about
//! rooms, presence or matchmaking — only how bytes are laid out.

mod error;
mod frame;
mod ids;

pub use error::FrameError;
pub use frame::{close, code, error_code, Frame, MessageType};
pub use ids::{ProcessId, RoomId, SessionId};
