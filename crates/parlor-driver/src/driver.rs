//! The [`Driver`] and [`RoomCache`] capability traits.

use std::future::Future;

use parlor_protocol::{ProcessId, RoomId};
use serde_json::Value;

use crate::{DriverError, Query, RoomListing, SortBy};

/// Field updates applied to a listing in one step.
///
/// The typed equivalent of a `{$set, $inc}` document: `set_*` fields
/// overwrite, `inc_clients` adjusts the provisional client count.
#[derive(Debug, Clone, Default)]
pub struct CacheUpdate {
    pub set_locked: Option<bool>,
    pub set_private: Option<bool>,
    pub set_unlisted: Option<bool>,
    pub set_metadata: Option<Value>,
    pub set_clients: Option<u32>,
    pub inc_clients: i32,
}

impl CacheUpdate {
    pub fn lock(locked: bool) -> Self {
        Self {
            set_locked: Some(locked),
            ..Self::default()
        }
    }

    pub fn visibility(private: bool) -> Self {
        Self {
            set_private: Some(private),
            ..Self::default()
        }
    }

    pub fn metadata(metadata: Value) -> Self {
        Self {
            set_metadata: Some(metadata),
            ..Self::default()
        }
    }

    pub fn clients(clients: u32, locked: bool) -> Self {
        Self {
            set_clients: Some(clients),
            set_locked: Some(locked),
            ..Self::default()
        }
    }

    /// Applies this update to a listing.
    pub fn apply(&self, listing: &mut RoomListing) {
        if let Some(locked) = self.set_locked {
            listing.locked = locked;
        }
        if let Some(private) = self.set_private {
            listing.private = private;
        }
        if let Some(unlisted) = self.set_unlisted {
            listing.unlisted = unlisted;
        }
        if let Some(metadata) = &self.set_metadata {
            listing.metadata = metadata.clone();
        }
        if let Some(clients) = self.set_clients {
            listing.clients = clients;
        }
        if self.inc_clients != 0 {
            listing.clients = listing.clients.saturating_add_signed(self.inc_clients);
        }
    }
}

/// A handle to one room's listing, held by the owning process.
pub trait RoomCache: Send + Sync + 'static {
    /// Snapshot of the current listing.
    fn listing(&self) -> impl Future<Output = RoomListing> + Send;

    /// Writes the current listing to the store.
    fn save(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Applies field updates and writes the result.
    fn update_one(&self, update: CacheUpdate)
        -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Deletes the listing from the store.
    fn remove(&self) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// The listing store seam.
pub trait Driver: Send + Sync + 'static {
    type Cache: RoomCache;

    /// Inserts a fresh listing and returns the owner's handle to it.
    fn create_instance(
        &self,
        initial: RoomListing,
    ) -> impl Future<Output = Result<Self::Cache, DriverError>> + Send;

    /// Whether a listing exists for a room id.
    fn has(&self, room_id: &RoomId) -> impl Future<Output = Result<bool, DriverError>> + Send;

    /// First listing matching the query, under the given sort order.
    fn find_one(
        &self,
        query: &Query,
        sort: Option<&SortBy>,
    ) -> impl Future<Output = Result<Option<RoomListing>, DriverError>> + Send;

    /// All listings matching the query, under the given sort order.
    fn query(
        &self,
        query: &Query,
        sort: Option<&SortBy>,
    ) -> impl Future<Output = Result<Vec<RoomListing>, DriverError>> + Send;

    /// Removes every listing owned by a process (best-effort reaping of a
    /// dead process's rooms).
    fn cleanup(
        &self,
        process_id: &ProcessId,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;
}
