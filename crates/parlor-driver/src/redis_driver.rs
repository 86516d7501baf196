//! Redis-backed [`Driver`] implementation.
//!
//! All listings live in one hash (`roomcaches`), keyed by room id with JSON
//! values. Queries fetch the whole hash and filter in memory; to keep a
//! burst of matchmaking queries from hammering Redis, concurrent fetches
//! coalesce onto a single in-flight `HGETALL` and per-room-name parse
//! results are memoised for the duration of that fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parlor_protocol::{ProcessId, RoomId};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::{CacheUpdate, Driver, DriverError, Query, RoomCache, RoomListing, SortBy};

/// The hash every process's listings are stored in.
const ROOMCACHES_KEY: &str = "roomcaches";

/// Maximum fields removed per HDEL during cleanup.
const CLEANUP_BATCH: usize = 500;

type RawFetch = Shared<BoxFuture<'static, Result<Arc<HashMap<String, String>>, Arc<DriverError>>>>;

/// One in-flight fetch plus its per-name parse memo.
#[derive(Clone)]
struct FetchState {
    generation: u64,
    raw: RawFetch,
    parsed: Arc<DashMap<String, Arc<Vec<RoomListing>>>>,
}

/// Listing store backed by a shared Redis hash.
pub struct RedisDriver {
    conn: MultiplexedConnection,
    inflight: StdMutex<Option<FetchState>>,
    generation: AtomicU64,
}

impl RedisDriver {
    /// Connects to Redis.
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(conn))
    }

    /// Builds a driver over an existing connection (sharing it with a
    /// `RedisPresence` is fine — the connection is multiplexed).
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            inflight: StdMutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Joins the in-flight fetch, or starts one.
    fn fetch_state(&self) -> FetchState {
        let mut guard = self.inflight.lock().expect("inflight lock poisoned");
        if let Some(state) = guard.as_ref() {
            return state.clone();
        }
        let mut conn = self.conn.clone();
        let raw: BoxFuture<'static, _> = async move {
            let raw: HashMap<String, String> = conn
                .hgetall(ROOMCACHES_KEY)
                .await
                .map_err(|e| Arc::new(DriverError::Redis(e)))?;
            Ok(Arc::new(raw))
        }
        .boxed();
        let state = FetchState {
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            raw: raw.shared(),
            parsed: Arc::new(DashMap::new()),
        };
        *guard = Some(state.clone());
        state
    }

    /// Releases the in-flight slot once its fetch resolved, so the next
    /// query reads fresh data. Only the matching generation is cleared.
    fn release_fetch(&self, generation: u64) {
        let mut guard = self.inflight.lock().expect("inflight lock poisoned");
        if guard.as_ref().map(|s| s.generation) == Some(generation) {
            *guard = None;
        }
    }

    async fn fetch(&self) -> Result<FetchResult, DriverError> {
        let state = self.fetch_state();
        let outcome = state.raw.clone().await;
        self.release_fetch(state.generation);
        match outcome {
            Ok(raw) => Ok(FetchResult {
                raw,
                parsed: state.parsed,
            }),
            Err(error) => Err(DriverError::Fetch(error.to_string())),
        }
    }
}

struct FetchResult {
    raw: Arc<HashMap<String, String>>,
    parsed: Arc<DashMap<String, Arc<Vec<RoomListing>>>>,
}

impl FetchResult {
    /// Listings for one room name, memoised per fetch.
    fn named(&self, name: &str) -> Arc<Vec<RoomListing>> {
        self.parsed
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(parse_named(&self.raw, name)))
            .clone()
    }

    /// Every listing in the hash.
    fn all(&self) -> Vec<RoomListing> {
        self.raw
            .values()
            .filter_map(|json| parse_listing(json))
            .collect()
    }
}

/// Parses only the entries that can belong to `name`, skipping JSON parsing
/// for everything else via a substring pre-filter.
fn parse_named(raw: &HashMap<String, String>, name: &str) -> Vec<RoomListing> {
    let needle = format!("\"name\":\"{name}\"");
    raw.values()
        .filter(|json| json.contains(&needle))
        .filter_map(|json| parse_listing(json))
        .filter(|listing| listing.name == name)
        .collect()
}

fn parse_listing(json: &str) -> Option<RoomListing> {
    match serde_json::from_str(json) {
        Ok(listing) => Some(listing),
        Err(error) => {
            tracing::warn!(%error, "skipping undecodable room listing");
            None
        }
    }
}

impl Driver for RedisDriver {
    type Cache = RedisRoomCache;

    async fn create_instance(&self, initial: RoomListing) -> Result<Self::Cache, DriverError> {
        let cache = RedisRoomCache {
            conn: self.conn.clone(),
            data: Mutex::new(initial),
        };
        cache.save().await?;
        Ok(cache)
    }

    async fn has(&self, room_id: &RoomId) -> Result<bool, DriverError> {
        let mut conn = self.conn.clone();
        Ok(conn.hexists(ROOMCACHES_KEY, room_id.as_str()).await?)
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
        let fetch = self.fetch().await?;
        let candidates: Vec<RoomListing> = match &query.name {
            Some(name) => fetch.named(name).as_ref().clone(),
            None => fetch.all(),
        };
        let mut matches: Vec<RoomListing> = candidates
            .into_iter()
            .filter(|listing| query.matches(listing))
            .collect();
        if let Some(sort) = sort {
            sort.sort(&mut matches);
        }
        Ok(matches)
    }

    async fn cleanup(&self, process_id: &ProcessId) -> Result<(), DriverError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(ROOMCACHES_KEY).await?;
        let needle = format!("\"processId\":\"{process_id}\"");
        let dead: Vec<String> = raw
            .iter()
            .filter(|(_, json)| json.contains(&needle))
            .filter(|(_, json)| {
                parse_listing(json)
                    .map(|l| l.process_id == *process_id)
                    .unwrap_or(false)
            })
            .map(|(field, _)| field.clone())
            .collect();

        for chunk in dead.chunks(CLEANUP_BATCH) {
            let _: () = conn.hdel(ROOMCACHES_KEY, chunk.to_vec()).await?;
        }
        if !dead.is_empty() {
            tracing::info!(%process_id, rooms = dead.len(), "cleaned up listings of dead process");
        }
        Ok(())
    }
}

/// Owner's handle to one listing in the `roomcaches` hash.
pub struct RedisRoomCache {
    conn: MultiplexedConnection,
    data: Mutex<RoomListing>,
}

impl RoomCache for RedisRoomCache {
    async fn listing(&self) -> RoomListing {
        self.data.lock().await.clone()
    }

    async fn save(&self) -> Result<(), DriverError> {
        let (room_id, json) = {
            let data = self.data.lock().await;
            (data.room_id.clone(), serde_json::to_string(&*data)?)
        };
        let mut conn = self.conn.clone();
        let _: () = conn.hset(ROOMCACHES_KEY, room_id.as_str(), json).await?;
        Ok(())
    }

    async fn update_one(&self, update: CacheUpdate) -> Result<(), DriverError> {
        {
            let mut data = self.data.lock().await;
            update.apply(&mut data);
        }
        self.save().await
    }

    async fn remove(&self) -> Result<(), DriverError> {
        let room_id = self.data.lock().await.room_id.clone();
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(ROOMCACHES_KEY, room_id.as_str()).await?;
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The store itself needs a live Redis; these cover the pure parts.

    use super::*;
    use chrono::Utc;

    fn listing_json(name: &str, process: &str) -> String {
        serde_json::to_string(&RoomListing {
            room_id: RoomId::generate(),
            name: name.into(),
            process_id: ProcessId::from(process),
            public_address: None,
            clients: 0,
            max_clients: 4,
            locked: false,
            private: false,
            unlisted: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_named_prefilter_skips_other_names() {
        let mut raw = HashMap::new();
        raw.insert("r1".to_string(), listing_json("chat", "p1"));
        raw.insert("r2".to_string(), listing_json("battle", "p1"));
        raw.insert("r3".to_string(), listing_json("chat", "p2"));

        let chat = parse_named(&raw, "chat");
        assert_eq!(chat.len(), 2);
        assert!(chat.iter().all(|l| l.name == "chat"));
    }

    #[test]
    fn test_parse_named_survives_garbage_entries() {
        let mut raw = HashMap::new();
        raw.insert("r1".to_string(), listing_json("chat", "p1"));
        raw.insert("bad".to_string(), "{\"name\":\"chat\", garbage".to_string());

        let chat = parse_named(&raw, "chat");
        assert_eq!(chat.len(), 1);
    }

    #[test]
    fn test_parse_named_rejects_substring_false_positive() {
        // A room whose *metadata* mentions the needle must not match.
        let mut raw = HashMap::new();
        let mut decoy: RoomListing = serde_json::from_str(&listing_json("battle", "p1")).unwrap();
        decoy.metadata = serde_json::json!({ "note": { "name": "chat" } });
        raw.insert("r1".to_string(), serde_json::to_string(&decoy).unwrap());

        assert!(parse_named(&raw, "chat").is_empty());
    }
}
