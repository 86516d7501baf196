//! Room runtime for parlor.
//!
//! A room is an isolated tokio task that owns one authoritative session: its
//! clients, reserved seats, reconnection holds, clock, and state serializer.
//! The outside world talks to it through a [`RoomHandle`] over an mpsc
//! channel; the room reports lifecycle changes back through a [`RoomEvent`]
//! stream the matchmaker binds. This keeps every state mutation serialized
//! on the room's own task — the actor model.
//!
//! Game code implements [`RoomLogic`] and gets called back at the right
//! moments; everything a hook may touch hangs off [`Room`].

#![allow(async_fn_in_trait)]

mod actor;
mod client;
mod config;
mod error;
mod handle;
mod logic;
mod messages;
mod room;
mod serializer;

pub use actor::{create_room, RoomParams, SpawnedRoom};
pub use client::{Client, ClientRef, ClientState, Outbound};
pub use config::{
    RoomLifecycle, RoomOptions, DEFAULT_PATCH_RATE, DEFAULT_SEAT_RESERVATION_TIME,
    DEFAULT_SIMULATION_INTERVAL,
};
pub use error::RoomError;
pub use handle::{JoinedInfo, RoomEvent, RoomHandle, RoomSnapshot};
pub use logic::RoomLogic;
pub use messages::MessageRegistry;
pub use room::{BroadcastOptions, Reconnection, ReconnectionWindow, Room};
pub use serializer::{JsonSerializer, NoneSerializer, StateSerializer};
