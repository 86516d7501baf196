//! Room configuration and lifecycle state machine.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// How often state deltas are broadcast by default.
pub const DEFAULT_PATCH_RATE: Duration = Duration::from_millis(50);

/// How long a reserved seat survives unconsumed by default.
pub const DEFAULT_SEAT_RESERVATION_TIME: Duration = Duration::from_secs(15);

/// Default simulation tick when [`Room::set_simulation_interval`] is called
/// without an explicit delay (~60 Hz).
///
/// [`Room::set_simulation_interval`]: crate::Room::set_simulation_interval
pub const DEFAULT_SIMULATION_INTERVAL: Duration = Duration::from_micros(16_667);

// ---------------------------------------------------------------------------
// RoomOptions
// ---------------------------------------------------------------------------

/// Configuration a room starts with.
///
/// Returned by [`RoomLogic::options`](crate::RoomLogic::options); most
/// fields can still be changed on the live [`Room`](crate::Room).
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Maximum clients (connected plus unconsumed reserved seats).
    /// `u32::MAX` means unlimited.
    pub max_clients: u32,

    /// Dispose automatically once no clients and no reserved seats remain.
    pub auto_dispose: bool,

    /// Delta-broadcast cadence. `None` disables the patch loop.
    pub patch_rate: Option<Duration>,

    /// TTL for unconsumed seat reservations.
    pub seat_reservation_time: Duration,

    /// Hidden from matchmaking queries (but joinable by room id).
    pub private: bool,

    /// Excluded from default listing queries.
    pub unlisted: bool,

    /// Opaque listing metadata; matchmaking `filter_by` keys match on it.
    pub metadata: Value,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_clients: u32::MAX,
            auto_dispose: true,
            patch_rate: Some(DEFAULT_PATCH_RATE),
            seat_reservation_time: DEFAULT_SEAT_RESERVATION_TIME,
            private: false,
            unlisted: false,
            metadata: Value::Null,
        }
    }
}

impl RoomOptions {
    pub fn with_max_clients(mut self, max_clients: u32) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_auto_dispose(mut self, auto_dispose: bool) -> Self {
        self.auto_dispose = auto_dispose;
        self
    }

    pub fn with_patch_rate(mut self, patch_rate: Option<Duration>) -> Self {
        self.patch_rate = patch_rate;
        self
    }

    pub fn with_seat_reservation_time(mut self, ttl: Duration) -> Self {
        self.seat_reservation_time = ttl;
        self
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_unlisted(mut self, unlisted: bool) -> Self {
        self.unlisted = unlisted;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// RoomLifecycle
// ---------------------------------------------------------------------------

/// The lifecycle state of a room. Transitions are monotonic:
///
/// ```text
/// Creating → Created → Disposing
/// ```
///
/// A room in `Disposing` never accepts new seats, joins or reconnections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    Creating,
    Created,
    Disposing,
}

impl RoomLifecycle {
    pub fn is_disposing(&self) -> bool {
        matches!(self, Self::Disposing)
    }
}

impl fmt::Display for RoomLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Created => write!(f, "Created"),
            Self::Disposing => write!(f, "Disposing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RoomOptions::default();
        assert_eq!(options.max_clients, u32::MAX);
        assert!(options.auto_dispose);
        assert_eq!(options.patch_rate, Some(DEFAULT_PATCH_RATE));
        assert_eq!(options.seat_reservation_time, DEFAULT_SEAT_RESERVATION_TIME);
        assert!(!options.private);
        assert!(!options.unlisted);
    }

    #[test]
    fn test_builder_helpers() {
        let options = RoomOptions::default()
            .with_max_clients(2)
            .with_auto_dispose(false)
            .with_patch_rate(None)
            .with_private(true);
        assert_eq!(options.max_clients, 2);
        assert!(!options.auto_dispose);
        assert_eq!(options.patch_rate, None);
        assert!(options.private);
    }

    #[test]
    fn test_lifecycle_display() {
        assert_eq!(RoomLifecycle::Creating.to_string(), "Creating");
        assert_eq!(RoomLifecycle::Disposing.to_string(), "Disposing");
        assert!(RoomLifecycle::Disposing.is_disposing());
        assert!(!RoomLifecycle::Created.is_disposing());
    }
}
