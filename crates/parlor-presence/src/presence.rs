//! The [`Presence`] trait: the coordination capability bundle.
//!
//! Every method returns `impl Future + Send` so a generic
//! `P: Presence` can be used from spawned tasks. Implementations write
//! plain `async fn`s.
//!
//! # Guarantees
//!
//! - Delivery is at-most-once per subscriber.
//! - Per-topic order is preserved for a single publisher/subscriber pair;
//!   there is no ordering across topics.
//! - TTLs are best-effort: a key may outlive its deadline briefly under
//!   load, never the other way around.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::mpsc;

use crate::PresenceError;

/// A live subscription to a topic.
///
/// Messages are buffered in an unbounded channel; [`next`](Self::next)
/// yields `None` once the topic is unsubscribed or the presence shuts down.
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub(crate) fn new(topic: String, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { topic, rx }
    }

    /// The topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next published payload.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Returns a buffered payload without waiting, if one is ready.
    pub fn try_next(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

/// One subscriber's sending half, kept in a topic registry.
///
/// Shared by the local and redis implementations: closed receivers are
/// pruned on the next publish to their topic.
pub(crate) struct TopicSubscriber {
    pub(crate) tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// The coordination capability: pub/sub, KV, sets, hashes, lists, counters.
///
/// This is a capability bundle, not a storage abstraction — only the
/// operations the server core needs, with the semantics it relies on.
pub trait Presence: Send + Sync + 'static {
    // -- pub/sub --

    /// Subscribes to a topic. Multiple subscriptions per topic are allowed.
    fn subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Subscription, PresenceError>> + Send;

    /// Removes every subscription on a topic.
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), PresenceError>> + Send;

    /// Publishes a payload to all current subscribers of a topic.
    fn publish(
        &self,
        topic: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    // -- keys --

    fn set(&self, key: &str, value: &str)
        -> impl Future<Output = Result<(), PresenceError>> + Send;

    /// Sets a key with a time-to-live in seconds.
    fn setex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, PresenceError>> + Send;

    fn del(&self, key: &str) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, PresenceError>> + Send;

    /// (Re)sets the time-to-live of an existing key.
    fn expire(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    // -- sets --

    fn sadd(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn srem(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn smembers(&self, key: &str)
        -> impl Future<Output = Result<Vec<String>, PresenceError>> + Send;

    fn sismember(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, PresenceError>> + Send;

    fn scard(&self, key: &str) -> impl Future<Output = Result<usize, PresenceError>> + Send;

    /// Intersection of several sets.
    fn sinter(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<String>, PresenceError>> + Send;

    // -- hashes --

    fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, PresenceError>> + Send;

    fn hgetall(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>, PresenceError>> + Send;

    fn hdel(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    /// Atomically adds `delta` to a hash field, returning the new value.
    fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64, PresenceError>> + Send;

    /// [`hincrby`](Self::hincrby) that also (re)sets the TTL of the whole
    /// hash key. The create-path concurrency slot relies on the atomicity of
    /// the increment.
    fn hincrbyex(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<i64, PresenceError>> + Send;

    fn hlen(&self, key: &str) -> impl Future<Output = Result<usize, PresenceError>> + Send;

    // -- counters --

    fn incr(&self, key: &str) -> impl Future<Output = Result<i64, PresenceError>> + Send;

    fn decr(&self, key: &str) -> impl Future<Output = Result<i64, PresenceError>> + Send;

    // -- lists --

    fn lpush(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn rpush(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), PresenceError>> + Send;

    fn lpop(&self, key: &str) -> impl Future<Output = Result<Option<String>, PresenceError>> + Send;

    fn rpop(&self, key: &str) -> impl Future<Output = Result<Option<String>, PresenceError>> + Send;

    fn llen(&self, key: &str) -> impl Future<Output = Result<usize, PresenceError>> + Send;

    /// Blocking right-pop across several keys: waits up to `timeout_secs`
    /// for an element, returning `(key, value)` or `None` on timeout.
    fn brpop(
        &self,
        keys: &[&str],
        timeout_secs: f64,
    ) -> impl Future<Output = Result<Option<(String, String)>, PresenceError>> + Send;

    // -- introspection / lifecycle --

    /// Lists active pub/sub channels matching a glob pattern.
    fn channels(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<Vec<String>, PresenceError>> + Send;

    /// Releases resources; all subscriptions end after this.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}
