//! # parlor
//!
//! Multi-process, stateful, real-time room server core.
//!
//! A fleet of parlor processes shares a coordination backend
//! ([`Presence`](parlor_presence::Presence)) and a room-listing store
//! ([`Driver`](parlor_driver::Driver)). Each process runs one
//! [`Matchmaker`]: it registers room types, routes join/create requests to
//! the right process over the presence-backed IPC bus, and hosts its rooms
//! as isolated actor tasks ([`parlor_room`]).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parlor::prelude::*;
//!
//! # #[derive(Default)] struct ChatRoom;
//! # impl RoomLogic for ChatRoom {}
//! # async fn run() -> Result<(), MatchmakerError> {
//! let presence = Arc::new(LocalPresence::new());
//! let driver = Arc::new(LocalDriver::new());
//! let matchmaker =
//!     Matchmaker::create(presence, driver, MatchmakerConfig::default()).await?;
//!
//! matchmaker.define("chat", |_options| ChatRoom::default());
//! let seat = matchmaker
//!     .join_or_create("chat", serde_json::json!({}), serde_json::Value::Null)
//!     .await?;
//! # let _ = seat; Ok(())
//! # }
//! ```

mod error;
mod matchmaker;
mod selector;
mod stats;

pub use error::MatchmakerError;
pub use matchmaker::{
    DefineOptions, Matchmaker, MatchmakerConfig, MatchmakerState, SeatReservation,
};
pub use selector::{LowestRoomCount, ProcessSelector};
pub use stats::ProcessStats;

/// Re-exports everything a room-server developer needs.
pub mod prelude {
    pub use crate::{
        DefineOptions, LowestRoomCount, Matchmaker, MatchmakerConfig, MatchmakerError,
        MatchmakerState, ProcessSelector, ProcessStats, SeatReservation,
    };

    pub use parlor_clock::{Clock, TimerId};
    pub use parlor_driver::{
        CacheUpdate, Driver, DriverError, LocalDriver, Query, RoomCache, RoomListing, SortBy,
        SortDirection,
    };
    pub use parlor_presence::{ipc, LocalPresence, Presence, PresenceError, Subscription};
    pub use parlor_protocol::{
        close, code, error_code, Frame, MessageType, ProcessId, RoomId, SessionId,
    };
    pub use parlor_room::{
        BroadcastOptions, Client, ClientRef, ClientState, JoinedInfo, JsonSerializer,
        NoneSerializer, Outbound, Reconnection, ReconnectionWindow, Room, RoomError, RoomEvent,
        RoomHandle, RoomLifecycle, RoomLogic, RoomOptions, RoomSnapshot, StateSerializer,
    };

    #[cfg(feature = "redis")]
    pub use parlor_driver::RedisDriver;
    #[cfg(feature = "redis")]
    pub use parlor_presence::RedisPresence;
}
