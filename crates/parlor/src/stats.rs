//! Per-process counters and the fleet process registry.
//!
//! Each process keeps `{room_count, ccu}` in local atomics, mirrored into
//! the shared `roomcount` hash as `"<roomCount>,<ccu>"` at most once per
//! second (writes coalesce onto one deferred flush). Reading the fleet view
//! substitutes the local entry so a process never sees its own stale write.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parlor_presence::{Presence, PresenceError};
use parlor_protocol::ProcessId;

/// The hash the fleet registry lives in.
const ROOMCOUNT_KEY: &str = "roomcount";

/// Minimum spacing between persisted stats writes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// One process's entry in the fleet view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    pub process_id: ProcessId,
    pub room_count: i64,
    pub ccu: i64,
}

pub(crate) struct Stats<P: Presence> {
    presence: Arc<P>,
    process_id: ProcessId,
    room_count: AtomicI64,
    ccu: AtomicI64,
    flush_pending: AtomicBool,
    /// Set once this process was removed from the registry; no further
    /// writes so the exclusion sticks.
    excluded: AtomicBool,
}

impl<P: Presence> Stats<P> {
    pub(crate) fn new(presence: Arc<P>, process_id: ProcessId) -> Self {
        Self {
            presence,
            process_id,
            room_count: AtomicI64::new(0),
            ccu: AtomicI64::new(0),
            flush_pending: AtomicBool::new(false),
            excluded: AtomicBool::new(false),
        }
    }

    pub(crate) fn room_count(&self) -> i64 {
        self.room_count.load(Ordering::SeqCst)
    }

    pub(crate) fn ccu(&self) -> i64 {
        self.ccu.load(Ordering::SeqCst)
    }

    pub(crate) fn add_rooms(&self, delta: i64) -> i64 {
        self.room_count.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub(crate) fn add_ccu(&self, delta: i64) -> i64 {
        self.ccu.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Writes the current counters immediately.
    pub(crate) async fn flush_now(&self) -> Result<(), PresenceError> {
        if self.excluded.load(Ordering::SeqCst) {
            return Ok(());
        }
        let value = format!("{},{}", self.room_count(), self.ccu());
        self.presence
            .hset(ROOMCOUNT_KEY, self.process_id.as_str(), &value)
            .await
    }

    /// Coalesced flush: the first caller in a window arms one deferred
    /// write; later callers within the window piggyback on it.
    pub(crate) fn schedule_flush(this: &Arc<Self>) {
        if this.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let stats = Arc::clone(this);
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_INTERVAL).await;
            stats.flush_pending.store(false, Ordering::SeqCst);
            if let Err(error) = stats.flush_now().await {
                tracing::warn!(%error, "failed to persist process stats");
            }
        });
    }

    /// The fleet view, with the local entry substituted from the atomics.
    pub(crate) async fn fetch_all(&self) -> Result<Vec<ProcessStats>, PresenceError> {
        let raw = self.presence.hgetall(ROOMCOUNT_KEY).await?;
        let mut all: Vec<ProcessStats> = raw
            .into_iter()
            .filter(|(process_id, _)| process_id != self.process_id.as_str())
            .filter_map(|(process_id, value)| {
                let (room_count, ccu) = parse_entry(&value)?;
                Some(ProcessStats {
                    process_id: ProcessId(process_id),
                    room_count,
                    ccu,
                })
            })
            .collect();
        if !self.excluded.load(Ordering::SeqCst) {
            all.push(ProcessStats {
                process_id: self.process_id.clone(),
                room_count: self.room_count(),
                ccu: self.ccu(),
            });
        }
        Ok(all)
    }

    /// Total connected clients across the fleet.
    pub(crate) async fn global_ccu(&self) -> Result<i64, PresenceError> {
        Ok(self.fetch_all().await?.iter().map(|stats| stats.ccu).sum())
    }

    /// Removes a process from the registry. Excluding the local process
    /// also stops future writes (used by graceful shutdown).
    pub(crate) async fn exclude(&self, process_id: &ProcessId) -> Result<(), PresenceError> {
        if *process_id == self.process_id {
            self.excluded.store(true, Ordering::SeqCst);
        }
        self.presence
            .hdel(ROOMCOUNT_KEY, process_id.as_str())
            .await
    }
}

fn parse_entry(value: &str) -> Option<(i64, i64)> {
    let (rooms, ccu) = value.split_once(',')?;
    Some((rooms.parse().ok()?, ccu.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_presence::LocalPresence;

    fn stats() -> Arc<Stats<LocalPresence>> {
        Arc::new(Stats::new(
            Arc::new(LocalPresence::new()),
            ProcessId::from("p1"),
        ))
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(parse_entry("3,17"), Some((3, 17)));
        assert_eq!(parse_entry("garbage"), None);
        assert_eq!(parse_entry("1,x"), None);
    }

    #[tokio::test]
    async fn test_flush_now_writes_wire_form() {
        let stats = stats();
        stats.add_rooms(2);
        stats.add_ccu(5);
        stats.flush_now().await.unwrap();

        let written = stats.presence.hget(ROOMCOUNT_KEY, "p1").await.unwrap();
        assert_eq!(written, Some("2,5".into()));
    }

    #[tokio::test]
    async fn test_fetch_all_substitutes_local_entry() {
        let stats = stats();
        // A stale persisted value...
        stats.presence.hset(ROOMCOUNT_KEY, "p1", "0,0").await.unwrap();
        stats.presence.hset(ROOMCOUNT_KEY, "p2", "4,9").await.unwrap();
        // ...and newer local counters that were not flushed yet.
        stats.add_rooms(3);

        let mut all = stats.fetch_all().await.unwrap();
        all.sort_by(|a, b| a.process_id.as_str().cmp(b.process_id.as_str()));

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].process_id, ProcessId::from("p1"));
        assert_eq!(all[0].room_count, 3, "local entry wins over stale hash");
        assert_eq!(all[1].room_count, 4);
    }

    #[tokio::test]
    async fn test_exclude_removes_entry_and_stops_writes() {
        let stats = stats();
        stats.flush_now().await.unwrap();
        stats.exclude(&ProcessId::from("p1")).await.unwrap();

        assert_eq!(stats.presence.hget(ROOMCOUNT_KEY, "p1").await.unwrap(), None);

        // Later flushes are no-ops: the exclusion sticks.
        stats.add_rooms(1);
        stats.flush_now().await.unwrap();
        assert_eq!(stats.presence.hget(ROOMCOUNT_KEY, "p1").await.unwrap(), None);

        // And the fleet view no longer contains the excluded process.
        assert!(stats.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_global_ccu_sums_fleet() {
        let stats = stats();
        stats.presence.hset(ROOMCOUNT_KEY, "p2", "1,10").await.unwrap();
        stats.presence.hset(ROOMCOUNT_KEY, "p3", "1,7").await.unwrap();
        stats.add_ccu(3);

        assert_eq!(stats.global_ccu().await.unwrap(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_flush_coalesces() {
        let stats = stats();
        stats.add_rooms(1);
        Stats::schedule_flush(&stats);
        stats.add_rooms(1);
        Stats::schedule_flush(&stats); // piggybacks on the pending flush

        // Nothing written until the window elapses.
        assert_eq!(stats.presence.hget(ROOMCOUNT_KEY, "p1").await.unwrap(), None);

        tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(10)).await;
        let written = stats.presence.hget(ROOMCOUNT_KEY, "p1").await.unwrap();
        assert_eq!(written, Some("2,0".into()));
    }
}
