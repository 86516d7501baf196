//! In-process [`Presence`] implementation.
//!
//! Backed by concurrent maps; TTLs are deadlines checked lazily whenever a
//! key is touched. Good for single-process deployments, tests, and dev mode
//! (where [`snapshot`](LocalPresence::snapshot) /
//! [`restore`](LocalPresence::restore) persist the stores across restarts).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::presence::TopicSubscriber;
use crate::{Presence, PresenceError, Subscription};

/// In-memory presence for a single process.
#[derive(Default)]
pub struct LocalPresence {
    subscribers: DashMap<String, Vec<TopicSubscriber>>,
    kv: DashMap<String, String>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
    lists: DashMap<String, VecDeque<String>>,
    /// Key → expiry deadline, across all namespaces. Purged on access.
    expirations: DashMap<String, Instant>,
    /// Woken on every list push so `brpop` waiters re-check.
    list_signal: Notify,
}

/// On-disk shape of a dev-mode snapshot.
#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a key from every store if its TTL deadline has passed.
    fn purge_expired(&self, key: &str) {
        let expired = self
            .expirations
            .get(key)
            .map(|deadline| *deadline <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.expirations.remove(key);
            self.kv.remove(key);
            self.hashes.remove(key);
            self.sets.remove(key);
            self.lists.remove(key);
        }
    }

    fn set_expiry(&self, key: &str, ttl_secs: u64) {
        self.expirations
            .insert(key.to_string(), Instant::now() + Duration::from_secs(ttl_secs));
    }

    /// Writes a dev-mode snapshot of all stores (subscriptions excluded).
    pub fn snapshot(&self, path: &Path) -> Result<(), PresenceError> {
        let snapshot = Snapshot {
            kv: self
                .kv
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            hashes: self
                .hashes
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            sets: self
                .sets
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            lists: self
                .lists
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        std::fs::write(path, serde_json::to_vec(&snapshot)?)?;
        tracing::debug!(path = %path.display(), "presence snapshot written");
        Ok(())
    }

    /// Restores stores from a snapshot written by [`snapshot`](Self::snapshot).
    pub fn restore(&self, path: &Path) -> Result<(), PresenceError> {
        let snapshot: Snapshot = serde_json::from_slice(&std::fs::read(path)?)?;
        for (k, v) in snapshot.kv {
            self.kv.insert(k, v);
        }
        for (k, v) in snapshot.hashes {
            self.hashes.insert(k, v);
        }
        for (k, v) in snapshot.sets {
            self.sets.insert(k, v);
        }
        for (k, v) in snapshot.lists {
            self.lists.insert(k, v);
        }
        tracing::debug!(path = %path.display(), "presence snapshot restored");
        Ok(())
    }
}

impl Presence for LocalPresence {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, PresenceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(TopicSubscriber { tx });
        Ok(Subscription::new(topic.to_string(), rx))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), PresenceError> {
        // Dropping the senders closes every receiver on the topic.
        self.subscribers.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<(), PresenceError> {
        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.retain(|sub| sub.tx.send(data.to_vec()).is_ok());
        }
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        self.kv.insert(key.to_string(), value.to_string());
        self.expirations.remove(key);
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PresenceError> {
        self.kv.insert(key.to_string(), value.to_string());
        self.set_expiry(key, ttl_secs);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PresenceError> {
        self.purge_expired(key);
        Ok(self.kv.get(key).map(|v| v.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), PresenceError> {
        self.kv.remove(key);
        self.hashes.remove(key);
        self.sets.remove(key);
        self.lists.remove(key);
        self.expirations.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PresenceError> {
        self.purge_expired(key);
        Ok(self.kv.contains_key(key)
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.lists.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), PresenceError> {
        self.set_expiry(key, ttl_secs);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), PresenceError> {
        self.purge_expired(key);
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), PresenceError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, PresenceError> {
        self.purge_expired(key);
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, PresenceError> {
        self.purge_expired(key);
        Ok(self
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> Result<usize, PresenceError> {
        self.purge_expired(key);
        Ok(self.sets.get(key).map(|set| set.len()).unwrap_or(0))
    }

    async fn sinter(&self, keys: &[&str]) -> Result<Vec<String>, PresenceError> {
        let mut iter = keys.iter();
        let Some(first) = iter.next() else {
            return Ok(Vec::new());
        };
        self.purge_expired(first);
        let mut result: HashSet<String> = self
            .sets
            .get(*first)
            .map(|set| set.clone())
            .unwrap_or_default();
        for key in iter {
            self.purge_expired(key);
            match self.sets.get(*key) {
                Some(set) => result.retain(|member| set.contains(member)),
                None => return Ok(Vec::new()),
            }
        }
        Ok(result.into_iter().collect())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PresenceError> {
        self.purge_expired(key);
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PresenceError> {
        self.purge_expired(key);
        Ok(self.hashes.get(key).and_then(|hash| hash.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PresenceError> {
        self.purge_expired(key);
        Ok(self.hashes.get(key).map(|hash| hash.clone()).unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), PresenceError> {
        if let Some(mut hash) = self.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, PresenceError> {
        self.purge_expired(key);
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hincrbyex(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> Result<i64, PresenceError> {
        let next = self.hincrby(key, field, delta).await?;
        self.set_expiry(key, ttl_secs);
        Ok(next)
    }

    async fn hlen(&self, key: &str) -> Result<usize, PresenceError> {
        self.purge_expired(key);
        Ok(self.hashes.get(key).map(|hash| hash.len()).unwrap_or(0))
    }

    async fn incr(&self, key: &str) -> Result<i64, PresenceError> {
        self.purge_expired(key);
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| "0".into());
        let next: i64 = entry.parse::<i64>().unwrap_or(0) + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn decr(&self, key: &str) -> Result<i64, PresenceError> {
        self.purge_expired(key);
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| "0".into());
        let next: i64 = entry.parse::<i64>().unwrap_or(0) - 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        self.purge_expired(key);
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.list_signal.notify_waiters();
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        self.purge_expired(key);
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        self.list_signal.notify_waiters();
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, PresenceError> {
        self.purge_expired(key);
        Ok(self.lists.get_mut(key).and_then(|mut list| list.pop_front()))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, PresenceError> {
        self.purge_expired(key);
        Ok(self.lists.get_mut(key).and_then(|mut list| list.pop_back()))
    }

    async fn llen(&self, key: &str) -> Result<usize, PresenceError> {
        self.purge_expired(key);
        Ok(self.lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn brpop(
        &self,
        keys: &[&str],
        timeout_secs: f64,
    ) -> Result<Option<(String, String)>, PresenceError> {
        let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs);
        loop {
            // Register for wake-ups before checking, so a push between the
            // check and the await is not missed.
            let notified = self.list_signal.notified();
            for key in keys {
                self.purge_expired(key);
                if let Some(mut list) = self.lists.get_mut(*key) {
                    if let Some(value) = list.pop_back() {
                        return Ok(Some((key.to_string(), value)));
                    }
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn channels(&self, pattern: &str) -> Result<Vec<String>, PresenceError> {
        Ok(self
            .subscribers
            .iter()
            .filter(|entry| !entry.value().is_empty() && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn shutdown(&self) {
        self.subscribers.clear();
    }
}

/// Minimal glob matching: `*` matches any run of characters.
fn glob_match(pattern: &str, value: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == value;
    }
    let mut rest = value;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => {
                // The first segment must anchor at the start.
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + segment.len()..];
            }
            None => return false,
        }
    }
    // The last segment must anchor at the end.
    segments
        .last()
        .map(|last| last.is_empty() || value.ends_with(last))
        .unwrap_or(true)
}

// =========================================================================
// Tests
// =========================================================================
