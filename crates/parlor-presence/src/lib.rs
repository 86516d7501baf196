//! Coordination layer for parlor.
//!
//! [`Presence`] is the one capability every distributed feature of the server
//! is built on: topic pub/sub, keys with TTL, hashes, sets, lists and
//! counters. Two implementations are provided:
//!
//! - [`LocalPresence`] — in-process, for single-process deployments, tests
//!   and development (with optional snapshot/restore).
//! - [`RedisPresence`] — backed by a shared Redis, for multi-process fleets
//!   (behind the default-on `redis` feature).
//!
//! The [`ipc`] module layers a correlated request/reply pattern on top of
//! pub/sub: this is how matchmaking methods and room method calls travel
//! between processes.

#![allow(async_fn_in_trait)]

pub mod ipc;

mod error;
mod local;
mod presence;
#[cfg(feature = "redis")]
mod redis_presence;

pub use error::{IpcError, PresenceError};
pub use local::LocalPresence;
pub use presence::{Presence, Subscription};
#[cfg(feature = "redis")]
pub use redis_presence::RedisPresence;
