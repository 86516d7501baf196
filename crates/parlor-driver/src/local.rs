//! In-memory [`Driver`] implementation.
//!
//! Clones of one `LocalDriver` share the same store, so several matchmakers
//! in one process (or one test) see the same fleet of listings.

use std::sync::Arc;

use dashmap::DashMap;
use parlor_protocol::{ProcessId, RoomId};
use tokio::sync::Mutex;

use crate::{CacheUpdate, Driver, DriverError, Query, RoomCache, RoomListing, SortBy};

type Store = Arc<DashMap<RoomId, RoomListing>>;

/// Shared in-memory listing store.
#[derive(Default, Clone)]
pub struct LocalDriver {
    rooms: Store,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for LocalDriver {
    type Cache = LocalRoomCache;

    async fn create_instance(&self, initial: RoomListing) -> Result<Self::Cache, DriverError> {
        self.rooms.insert(initial.room_id.clone(), initial.clone());
        Ok(LocalRoomCache {
            rooms: Arc::clone(&self.rooms),
            data: Mutex::new(initial),
        })
    }

    async fn has(&self, room_id: &RoomId) -> Result<bool, DriverError> {
        Ok(self.rooms.contains_key(room_id))
    }

    async fn find_one(
        &self,
        query: &Query,
        sort: Option<&SortBy>,
    ) -> Result<Option<RoomListing>, DriverError> {
        Ok(self.query(query, sort).await?.into_iter().next())
    }

    async fn query(
        &self,
        query: &Query,
        sort: Option<&SortBy>,
    ) -> Result<Vec<RoomListing>, DriverError> {
        let mut matches: Vec<RoomListing> = self
            .rooms
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        if let Some(sort) = sort {
            sort.sort(&mut matches);
        }
        Ok(matches)
    }

    async fn cleanup(&self, process_id: &ProcessId) -> Result<(), DriverError> {
        self.rooms
            .retain(|_, listing| listing.process_id != *process_id);
        Ok(())
    }
}

/// Owner's handle to one listing in a [`LocalDriver`].
pub struct LocalRoomCache {
    rooms: Store,
    data: Mutex<RoomListing>,
}

impl RoomCache for LocalRoomCache {
    async fn listing(&self) -> RoomListing {
        self.data.lock().await.clone()
    }

    async fn save(&self) -> Result<(), DriverError> {
        let data = self.data.lock().await.clone();
        self.rooms.insert(data.room_id.clone(), data);
        Ok(())
    }

    async fn update_one(&self, update: CacheUpdate) -> Result<(), DriverError> {
        let data = {
            let mut guard = self.data.lock().await;
            update.apply(&mut guard);
            guard.clone()
        };
        self.rooms.insert(data.room_id.clone(), data);
        Ok(())
    }

    async fn remove(&self) -> Result<(), DriverError> {
        let room_id = self.data.lock().await.room_id.clone();
        self.rooms.remove(&room_id);
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn listing(name: &str, process: &str, clients: u32) -> RoomListing {
        RoomListing {
            room_id: RoomId::generate(),
            name: name.into(),
            process_id: ProcessId::from(process),
            public_address: None,
            clients,
            max_clients: 4,
            locked: false,
            private: false,
            unlisted: false,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_instance_makes_listing_visible() {
        let driver = LocalDriver::new();
        let initial = listing("chat", "p1", 0);
        let room_id = initial.room_id.clone();

        driver.create_instance(initial).await.unwrap();

        assert!(driver.has(&room_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_clones_share_the_store() {
        let driver = LocalDriver::new();
        let other = driver.clone();
        let initial = listing("chat", "p1", 0);
        let room_id = initial.room_id.clone();

        driver.create_instance(initial).await.unwrap();

        assert!(other.has(&room_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_one_applies_sort() {
        let driver = LocalDriver::new();
        driver.create_instance(listing("chat", "p1", 3)).await.unwrap();
        driver.create_instance(listing("chat", "p1", 1)).await.unwrap();

        let found = driver
            .find_one(&Query::for_join("chat"), Some(&SortBy::ascending("clients")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.clients, 1);
    }

    #[tokio::test]
    async fn test_update_one_mutates_store() {
        let driver = LocalDriver::new();
        let cache = driver.create_instance(listing("chat", "p1", 0)).await.unwrap();

        let mut update = CacheUpdate::lock(true);
        update.inc_clients = 2;
        cache.update_one(update).await.unwrap();

        let found = driver
            .find_one(&Query::any(), None)
            .await
            .unwrap()
            .unwrap();
        assert!(found.locked);
        assert_eq!(found.clients, 2);
    }

    #[tokio::test]
    async fn test_update_one_metadata() {
        let driver = LocalDriver::new();
        let cache = driver.create_instance(listing("chat", "p1", 0)).await.unwrap();

        cache
            .update_one(CacheUpdate::metadata(json!({ "mode": "ranked" })))
            .await
            .unwrap();

        let found = driver.find_one(&Query::any(), None).await.unwrap().unwrap();
        assert_eq!(found.metadata["mode"], "ranked");
    }

    #[tokio::test]
    async fn test_remove_deletes_listing() {
        let driver = LocalDriver::new();
        let initial = listing("chat", "p1", 0);
        let room_id = initial.room_id.clone();
        let cache = driver.create_instance(initial).await.unwrap();

        cache.remove().await.unwrap();

        assert!(!driver.has(&room_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_that_process() {
        let driver = LocalDriver::new();
        driver.create_instance(listing("chat", "p1", 0)).await.unwrap();
        driver.create_instance(listing("chat", "p1", 0)).await.unwrap();
        driver.create_instance(listing("chat", "p2", 0)).await.unwrap();

        driver.cleanup(&ProcessId::from("p1")).await.unwrap();

        let remaining = driver.query(&Query::any(), None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].process_id, ProcessId::from("p2"));
    }
}
