//! Identity types: room, session and process ids.
//!
//! All three are opaque strings on the wire. Rooms and sessions use short
//! alphanumeric ids (unique enough at fleet scale, cheap to log and compare);
//! a process id is minted once at boot and dies with the process.

use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated room/session ids.
const ID_LENGTH: usize = 9;

fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A unique identifier for a room, unique across the fleet.
///
/// Newtype over `String`; `#[serde(transparent)]` keeps the wire form a
/// plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Mints a fresh random room id.
    pub fn generate() -> Self {
        Self(random_id(ID_LENGTH))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A unique identifier for a client session within a room.
///
/// Assigned at seat-reservation time, before the transport connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Mints a fresh random session id.
    pub fn generate() -> Self {
        Self(random_id(ID_LENGTH))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A stable identifier for a server process, valid for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub String);

impl ProcessId {
    /// Mints a fresh random process id.
    pub fn generate() -> Self {
        Self(random_id(ID_LENGTH))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_expected_length() {
        assert_eq!(RoomId::generate().as_str().len(), ID_LENGTH);
        assert_eq!(SessionId::generate().as_str().len(), ID_LENGTH);
        assert_eq!(ProcessId::generate().as_str().len(), ID_LENGTH);
    }

    #[test]
    fn test_generate_produces_unique_ids() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        // `#[serde(transparent)]` means RoomId("abc") → `"abc"`.
        let json = serde_json::to_string(&RoomId::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_room_id_deserializes_from_plain_string() {
        let id: RoomId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(id, RoomId::from("xyz"));
    }

    #[test]
    fn test_ids_work_as_map_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(SessionId::from("s1"), 1);
        map.insert(SessionId::from("s2"), 2);
        assert_eq!(map[&SessionId::from("s1")], 1);
    }
}
