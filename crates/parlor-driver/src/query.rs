//! Listing query conditions and sort orders.

use std::cmp::Ordering;

use parlor_protocol::RoomId;
use serde_json::Value;

use crate::RoomListing;

/// Conditions a listing must meet to match.
///
/// [`Query::for_join`] is the matchmaking default: named, unlocked, public,
/// listed, with a free seat. `metadata` pairs are equality-matched against
/// the listing's metadata object (the handler's `filter_by` keys end up
/// here).
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub room_id: Option<RoomId>,
    pub name: Option<String>,
    pub locked: Option<bool>,
    pub private: Option<bool>,
    pub unlisted: Option<bool>,
    pub require_capacity: bool,
    pub metadata: Vec<(String, Value)>,
}

impl Query {
    /// All listings, no conditions.
    pub fn any() -> Self {
        Self::default()
    }

    /// The default join filter for a room name.
    pub fn for_join(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            locked: Some(false),
            private: Some(false),
            unlisted: Some(false),
            require_capacity: true,
            ..Self::default()
        }
    }

    /// Looks up one specific room.
    pub fn by_room_id(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    /// Includes unlisted rooms (excluded by [`for_join`](Self::for_join)).
    pub fn with_unlisted(mut self) -> Self {
        self.unlisted = None;
        self
    }

    /// Adds a metadata equality condition.
    pub fn filter(mut self, key: &str, value: Value) -> Self {
        self.metadata.push((key.to_string(), value));
        self
    }

    /// Whether a listing satisfies every condition.
    pub fn matches(&self, listing: &RoomListing) -> bool {
        if let Some(room_id) = &self.room_id {
            if listing.room_id != *room_id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if listing.name != *name {
                return false;
            }
        }
        if let Some(locked) = self.locked {
            if listing.locked != locked {
                return false;
            }
        }
        if let Some(private) = self.private {
            if listing.private != private {
                return false;
            }
        }
        if let Some(unlisted) = self.unlisted {
            if listing.unlisted != unlisted {
                return false;
            }
        }
        if self.require_capacity && !listing.has_capacity() {
            return false;
        }
        for (key, expected) in &self.metadata {
            if listing.metadata.get(key) != Some(expected) {
                return false;
            }
        }
        true
    }
}

/// Sort direction for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A sort order over listing fields.
///
/// Recognized fields: `clients`, `maxClients`, `createdAt`; anything else is
/// looked up in the listing's metadata.
#[derive(Debug, Clone, Default)]
pub struct SortBy(pub Vec<(String, SortDirection)>);

impl SortBy {
    pub fn ascending(field: &str) -> Self {
        Self(vec![(field.to_string(), SortDirection::Ascending)])
    }

    pub fn descending(field: &str) -> Self {
        Self(vec![(field.to_string(), SortDirection::Descending)])
    }

    pub fn then(mut self, field: &str, direction: SortDirection) -> Self {
        self.0.push((field.to_string(), direction));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares two listings under this order.
    pub fn compare(&self, a: &RoomListing, b: &RoomListing) -> Ordering {
        for (field, direction) in &self.0 {
            let ordering = compare_field(a, b, field);
            let ordering = match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Sorts listings in place under this order.
    pub fn sort(&self, listings: &mut [RoomListing]) {
        if !self.is_empty() {
            listings.sort_by(|a, b| self.compare(a, b));
        }
    }
}

fn compare_field(a: &RoomListing, b: &RoomListing, field: &str) -> Ordering {
    match field {
        "clients" => a.clients.cmp(&b.clients),
        "maxClients" => a.max_clients.cmp(&b.max_clients),
        "createdAt" => a.created_at.cmp(&b.created_at),
        key => compare_values(
            a.metadata.get(key).unwrap_or(&Value::Null),
            b.metadata.get(key).unwrap_or(&Value::Null),
        ),
    }
}

/// Total order over JSON scalars: null < bool < number < string; other
/// shapes compare equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlor_protocol::ProcessId;
    use serde_json::json;

    fn listing(name: &str, clients: u32, metadata: Value) -> RoomListing {
        RoomListing {
            room_id: RoomId::generate(),
            name: name.into(),
            process_id: ProcessId::from("p1"),
            public_address: None,
            clients,
            max_clients: 4,
            locked: false,
            private: false,
            unlisted: false,
            metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_for_join_matches_open_room() {
        let query = Query::for_join("chat");
        assert!(query.matches(&listing("chat", 2, Value::Null)));
    }

    #[test]
    fn test_for_join_rejects_wrong_name() {
        let query = Query::for_join("chat");
        assert!(!query.matches(&listing("battle", 0, Value::Null)));
    }

    #[test]
    fn test_for_join_rejects_locked_private_unlisted() {
        let query = Query::for_join("chat");

        let mut locked = listing("chat", 0, Value::Null);
        locked.locked = true;
        assert!(!query.matches(&locked));

        let mut private = listing("chat", 0, Value::Null);
        private.private = true;
        assert!(!query.matches(&private));

        let mut unlisted = listing("chat", 0, Value::Null);
        unlisted.unlisted = true;
        assert!(!query.matches(&unlisted));
    }

    #[test]
    fn test_with_unlisted_includes_unlisted_rooms() {
        let query = Query::for_join("chat").with_unlisted();
        let mut unlisted = listing("chat", 0, Value::Null);
        unlisted.unlisted = true;
        assert!(query.matches(&unlisted));
    }

    #[test]
    fn test_for_join_rejects_full_room() {
        let query = Query::for_join("chat");
        assert!(!query.matches(&listing("chat", 4, Value::Null)));
    }

    #[test]
    fn test_metadata_filter_equality() {
        let query = Query::for_join("chat").filter("mode", json!("ranked"));
        assert!(query.matches(&listing("chat", 0, json!({ "mode": "ranked" }))));
        assert!(!query.matches(&listing("chat", 0, json!({ "mode": "casual" }))));
        assert!(!query.matches(&listing("chat", 0, Value::Null)));
    }

    #[test]
    fn test_by_room_id_matches_exactly() {
        let target = listing("chat", 0, Value::Null);
        let query = Query::by_room_id(target.room_id.clone());
        assert!(query.matches(&target));
        assert!(!query.matches(&listing("chat", 0, Value::Null)));
    }

    #[test]
    fn test_sort_by_clients_ascending() {
        let mut listings = vec![
            listing("chat", 3, Value::Null),
            listing("chat", 1, Value::Null),
            listing("chat", 2, Value::Null),
        ];
        SortBy::ascending("clients").sort(&mut listings);
        let counts: Vec<u32> = listings.iter().map(|l| l.clients).collect();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_by_metadata_descending_with_tiebreak() {
        let mut listings = vec![
            listing("chat", 2, json!({ "elo": 1200 })),
            listing("chat", 1, json!({ "elo": 1500 })),
            listing("chat", 0, json!({ "elo": 1200 })),
        ];
        SortBy::descending("elo")
            .then("clients", SortDirection::Ascending)
            .sort(&mut listings);
        assert_eq!(listings[0].metadata["elo"], 1500);
        assert_eq!(listings[1].clients, 0);
        assert_eq!(listings[2].clients, 2);
    }
}
