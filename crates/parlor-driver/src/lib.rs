//! Room-listing store for parlor.
//!
//! Every live room projects a [`RoomListing`] into a fleet-visible store so
//! matchmaking on any process can discover it. The [`Driver`] trait is the
//! storage seam; the listing is created when the room is created, mutated
//! only by the owning process, and removed on dispose (with a best-effort
//! [`Driver::cleanup`] if the process dies).
//!
//! Two implementations:
//!
//! - [`LocalDriver`] — shared in-memory map, filter + sort in memory.
//! - [`RedisDriver`] — one Redis hash (`roomcaches`), with concurrent
//!   queries coalesced onto a single in-flight fetch (behind the default-on
//!   `redis` feature).

#![allow(async_fn_in_trait)]

mod driver;
mod error;
mod listing;
mod local;
mod query;
#[cfg(feature = "redis")]
mod redis_driver;

pub use driver::{CacheUpdate, Driver, RoomCache};
pub use error::DriverError;
pub use listing::RoomListing;
pub use local::{LocalDriver, LocalRoomCache};
pub use query::{Query, SortBy, SortDirection};
#[cfg(feature = "redis")]
pub use redis_driver::{RedisDriver, RedisRoomCache};
