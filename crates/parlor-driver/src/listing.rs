//! The fleet-visible projection of a room.

use chrono::{DateTime, Utc};
use parlor_protocol::{ProcessId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything matchmaking needs to know about a room, on any process.
///
/// Wire form (hash-field value) is camelCase JSON with `createdAt` as
/// ISO-8601.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListing {
    pub room_id: RoomId,
    pub name: String,
    pub process_id: ProcessId,
    /// Address clients use to reach the owning process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    /// Connected clients plus unconsumed seat reservations.
    pub clients: u32,
    /// `u32::MAX` means unlimited.
    pub max_clients: u32,
    pub locked: bool,
    pub private: bool,
    pub unlisted: bool,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl RoomListing {
    /// Whether another seat fits.
    pub fn has_capacity(&self) -> bool {
        self.clients < self.max_clients
    }
}
