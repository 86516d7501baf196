//! The state-serializer seam.
//!
//! Rooms don't know what "state" is — the serializer owns it. The room asks
//! for full-state bytes on join and delta bytes on each patch tick; what a
//! "delta" is belongs to the implementation. A schema-based
//! delta-compressing serializer plugs in here; the built-ins are
//! [`JsonSerializer`] (sends the encoded state whenever it changed) and
//! [`NoneSerializer`] (no state sync at all).

use serde_json::Value;

/// Owns the room's replicated state and produces its wire forms.
pub trait StateSerializer: Send + 'static {
    /// Short identifier sent to clients in the `JOIN_ROOM` frame, so the
    /// client SDK picks the matching decoder.
    fn id(&self) -> &'static str;

    /// Replaces the tracked state.
    fn reset(&mut self, state: Value);

    /// Whether any state has been set.
    fn has_state(&self) -> bool;

    /// Full encoded state for a newly joined client.
    fn full_state(&mut self) -> Option<Vec<u8>>;

    /// Delta since the last patch, or `None` when nothing changed.
    fn patch(&mut self) -> Option<Vec<u8>>;

    /// Optional handshake bytes (schema metadata and the like).
    fn handshake(&self) -> Option<Vec<u8>> {
        None
    }
}

// ---------------------------------------------------------------------------
// JsonSerializer
// ---------------------------------------------------------------------------

/// JSON snapshot serializer: a "patch" is the full encoded state, emitted
/// only when it differs from the last one sent.
#[derive(Default)]
pub struct JsonSerializer {
    state: Option<Value>,
    last_patch: Option<Vec<u8>>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(&self) -> Option<Vec<u8>> {
        let state = self.state.as_ref()?;
        match serde_json::to_vec(state) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::warn!(%error, "room state failed to encode");
                None
            }
        }
    }
}

impl StateSerializer for JsonSerializer {
    fn id(&self) -> &'static str {
        "json"
    }

    fn reset(&mut self, state: Value) {
        self.state = Some(state);
    }

    fn has_state(&self) -> bool {
        self.state.is_some()
    }

    fn full_state(&mut self) -> Option<Vec<u8>> {
        self.encode()
    }

    fn patch(&mut self) -> Option<Vec<u8>> {
        let bytes = self.encode()?;
        if self.last_patch.as_ref() == Some(&bytes) {
            return None;
        }
        self.last_patch = Some(bytes.clone());
        Some(bytes)
    }
}

// ---------------------------------------------------------------------------
// NoneSerializer
// ---------------------------------------------------------------------------

/// No state synchronization: rooms that only relay messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneSerializer;

impl StateSerializer for NoneSerializer {
    fn id(&self) -> &'static str {
        "none"
    }

    fn reset(&mut self, _state: Value) {}

    fn has_state(&self) -> bool {
        false
    }

    fn full_state(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn patch(&mut self) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_serializer_patch_only_on_change() {
        let mut serializer = JsonSerializer::new();
        assert!(serializer.patch().is_none(), "no state, no patch");

        serializer.reset(json!({ "count": 1 }));
        assert!(serializer.patch().is_some(), "first patch carries the state");
        assert!(serializer.patch().is_none(), "unchanged state produces no patch");

        serializer.reset(json!({ "count": 2 }));
        assert!(serializer.patch().is_some(), "changed state patches again");
    }

    #[test]
    fn test_json_serializer_full_state_independent_of_patch() {
        let mut serializer = JsonSerializer::new();
        serializer.reset(json!({ "count": 1 }));
        let _ = serializer.patch();

        // A late joiner still gets the full state even with no pending patch.
        assert!(serializer.full_state().is_some());
    }

    #[test]
    fn test_none_serializer_produces_nothing() {
        let mut serializer = NoneSerializer;
        serializer.reset(json!({ "ignored": true }));
        assert!(!serializer.has_state());
        assert!(serializer.full_state().is_none());
        assert!(serializer.patch().is_none());
        assert_eq!(serializer.id(), "none");
    }
}
