//! Redis-backed [`Presence`] implementation for multi-process fleets.
//!
//! Uses two connections, as the pub/sub protocol requires: a multiplexed
//! command connection (also used for `PUBLISH`) and a dedicated pub/sub
//! connection. The pub/sub stream half is drained by a dispatcher task that
//! routes incoming messages into the same in-process subscriber registry the
//! local implementation uses, so `Subscription` behaves identically on both.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSubSink};
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::presence::TopicSubscriber;
use crate::{Presence, PresenceError, Subscription};

type Registry = Arc<DashMap<String, Vec<TopicSubscriber>>>;

/// Presence backed by a shared Redis instance.
pub struct RedisPresence {
    conn: MultiplexedConnection,
    registry: Registry,
    sink: Arc<Mutex<PubSubSink>>,
    dispatcher: JoinHandle<()>,
}

impl RedisPresence {
    /// Connects to Redis and starts the pub/sub dispatcher.
    pub async fn connect(url: &str) -> Result<Self, PresenceError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let pubsub = client.get_async_pubsub().await?;
        let (sink, mut stream) = pubsub.split();

        let registry: Registry = Arc::new(DashMap::new());
        let dispatch_registry = Arc::clone(&registry);
        let dispatcher = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(%channel, %error, "dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                if let Some(mut subscribers) = dispatch_registry.get_mut(&channel) {
                    subscribers.retain(|sub| sub.tx.send(payload.clone()).is_ok());
                }
            }
            tracing::debug!("redis pub/sub stream ended");
        });

        Ok(Self {
            conn,
            registry,
            sink: Arc::new(Mutex::new(sink)),
            dispatcher,
        })
    }
}

impl Presence for RedisPresence {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, PresenceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let first_for_topic = {
            let mut entry = self.registry.entry(topic.to_string()).or_default();
            let was_empty = entry.is_empty();
            entry.push(TopicSubscriber { tx });
            was_empty
        };
        if first_for_topic {
            self.sink.lock().await.subscribe(topic).await?;
        }
        Ok(Subscription::new(topic.to_string(), rx))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), PresenceError> {
        if self.registry.remove(topic).is_some() {
            self.sink.lock().await.unsubscribe(topic).await?;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(topic, data).await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn del(&self, key: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }

    async fn scard(&self, key: &str) -> Result<usize, PresenceError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.scard(key).await?;
        Ok(count as usize)
    }

    async fn sinter(&self, keys: &[&str]) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.sinter(keys.to_vec()).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn hincrbyex(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> Result<i64, PresenceError> {
        // HINCRBY + EXPIRE in one MULTI block: the increment is what the
        // concurrency slot depends on, the TTL just bounds stale slots.
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hincr(key, field, delta);
        pipe.expire(key, ttl_secs as i64).ignore();
        let (value,): (i64,) = pipe.query_async(&mut conn).await?;
        Ok(value)
    }

    async fn hlen(&self, key: &str) -> Result<usize, PresenceError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.hlen(key).await?;
        Ok(count as usize)
    }

    async fn incr(&self, key: &str) -> Result<i64, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1i64).await?)
    }

    async fn decr(&self, key: &str) -> Result<i64, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(key, 1i64).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop(key, None).await?)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop(key, None).await?)
    }

    async fn llen(&self, key: &str) -> Result<usize, PresenceError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.llen(key).await?;
        Ok(count as usize)
    }

    async fn brpop(
        &self,
        keys: &[&str],
        timeout_secs: f64,
    ) -> Result<Option<(String, String)>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(conn.brpop(keys.to_vec(), timeout_secs).await?)
    }

    async fn channels(&self, pattern: &str) -> Result<Vec<String>, PresenceError> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("PUBSUB")
            .arg("CHANNELS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?)
    }

    async fn shutdown(&self) {
        self.dispatcher.abort();
        self.registry.clear();
    }
}
