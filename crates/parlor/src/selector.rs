//! Pluggable policy for picking the process that hosts a new room.

use parlor_protocol::ProcessId;
use serde_json::Value;

use crate::ProcessStats;

/// Decides which process should create a room.
///
/// Receives the current fleet view from the stats hash; returning `None`
/// falls back to the calling process.
pub trait ProcessSelector: Send + Sync + 'static {
    fn select(
        &self,
        room_name: &str,
        options: &Value,
        processes: &[ProcessStats],
    ) -> Option<ProcessId>;
}

/// Default policy: the process hosting the fewest rooms (ties arbitrary).
pub struct LowestRoomCount;

impl ProcessSelector for LowestRoomCount {
    fn select(
        &self,
        _room_name: &str,
        _options: &Value,
        processes: &[ProcessStats],
    ) -> Option<ProcessId> {
        processes
            .iter()
            .min_by_key(|stats| stats.room_count)
            .map(|stats| stats.process_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(process_id: &str, room_count: i64) -> ProcessStats {
        ProcessStats {
            process_id: ProcessId::from(process_id),
            room_count,
            ccu: 0,
        }
    }

    #[test]
    fn test_lowest_room_count_picks_least_loaded() {
        let fleet = vec![stats("p1", 5), stats("p2", 1), stats("p3", 3)];
        let picked = LowestRoomCount.select("chat", &Value::Null, &fleet);
        assert_eq!(picked, Some(ProcessId::from("p2")));
    }

    #[test]
    fn test_lowest_room_count_empty_fleet_returns_none() {
        assert_eq!(LowestRoomCount.select("chat", &Value::Null, &[]), None);
    }
}
