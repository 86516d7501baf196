//! The room's internal state and the API hooks program against.
//!
//! [`Room`] is everything user code may touch from inside a hook, timer or
//! message handler: clients, broadcast, seats, reconnection holds, clock
//! timers, lock/visibility, and the serializer. It is owned by the room's
//! actor task; hooks receive `&mut Room<L>` alongside `&mut L`, so nothing
//! here needs locking.

use std::collections::HashMap;
use std::time::Duration;

use parlor_clock::{Clock, TimerId};
use parlor_protocol::{close, Frame, MessageType, ProcessId, RoomId, SessionId};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::handle::{RoomEvent, RoomSnapshot};
use crate::messages::{BytesCallback, MessageCallback, MessageRegistry, Validator};
use crate::{
    Client, JsonSerializer, RoomError, RoomLifecycle, RoomLogic, RoomOptions, StateSerializer,
    DEFAULT_SIMULATION_INTERVAL,
};

/// Callback for a clock timer, dispatched on the room task.
pub type TimerCallback<L> =
    Box<dyn FnMut(&mut L, &mut Room<L>) -> Result<(), RoomError> + Send>;

/// Callback for the simulation tick; receives the clock's `delta_time`.
pub type SimulationCallback<L> =
    Box<dyn FnMut(&mut L, &mut Room<L>, Duration) -> Result<(), RoomError> + Send>;

pub(crate) struct SimulationState<L: RoomLogic> {
    pub(crate) callback: SimulationCallback<L>,
    pub(crate) interval: Duration,
}

/// A provisional, TTL-bounded capacity slot granted before the transport
/// connects.
pub(crate) struct SeatReservation {
    pub(crate) options: Value,
    pub(crate) auth: Value,
    pub(crate) consumed: bool,
    /// Seats held for a reconnecting client skip the capacity check.
    pub(crate) for_reconnection: bool,
    /// `None` for seats tied to a reconnection hold (the hold's deadline
    /// governs) and for manual holds.
    pub(crate) deadline: Option<Instant>,
}

/// A pending reconnection: the departed client's token maps to this until
/// the window closes or the client returns.
pub(crate) struct ReconnectionHold {
    pub(crate) session_id: SessionId,
    /// `None` for `Manual` windows — only an explicit rejection ends them.
    pub(crate) deadline: Option<Instant>,
    pub(crate) resolve: oneshot::Sender<Client>,
}

/// How long a dropped client may resume its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionWindow {
    Seconds(u64),
    /// Held until [`Room::reject_reconnection`] (or room disposal).
    Manual,
}

/// The deferred half of [`Room::allow_reconnection`]: resolves with the
/// rejoined client, or errors when the window closes without one.
pub struct Reconnection {
    token: String,
    receiver: oneshot::Receiver<Client>,
}

impl Reconnection {
    /// The token the returning client must present.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Waits for the client to return.
    pub async fn resolved(self) -> Result<Client, RoomError> {
        self.receiver
            .await
            .map_err(|_| RoomError::InvalidReconnectionToken)
    }

    /// Non-blocking check; `Ok(None)` while the hold is still open.
    pub fn try_resolved(&mut self) -> Result<Option<Client>, RoomError> {
        match self.receiver.try_recv() {
            Ok(client) => Ok(Some(client)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(RoomError::InvalidReconnectionToken)
            }
        }
    }
}

/// Options for [`Room::broadcast`].
#[derive(Default)]
pub struct BroadcastOptions {
    /// Sessions to skip.
    pub except: Vec<SessionId>,
    /// Deliver after the next patch instead of immediately.
    pub after_next_patch: bool,
}

impl BroadcastOptions {
    pub fn except(session_id: &SessionId) -> Self {
        Self {
            except: vec![session_id.clone()],
            after_next_patch: false,
        }
    }

    pub fn after_next_patch() -> Self {
        Self {
            except: Vec::new(),
            after_next_patch: true,
        }
    }
}

struct QueuedBroadcast {
    bytes: Vec<u8>,
    except: Vec<SessionId>,
}

/// The room's mutable state, owned by its actor task.
pub struct Room<L: RoomLogic> {
    room_id: RoomId,
    room_name: String,
    process_id: ProcessId,
    dev_mode: bool,
    pub(crate) lifecycle: RoomLifecycle,

    max_clients: u32,
    auto_dispose: bool,
    patch_rate: Option<Duration>,
    seat_reservation_time: Duration,
    locked: bool,
    /// Whether the current lock was applied by the capacity check (and may
    /// be undone by it) rather than an explicit `lock()`.
    auto_locked: bool,
    private: bool,
    unlisted: bool,
    metadata: Value,

    pub(crate) clients: Vec<Client>,
    pub(crate) reserved_seats: HashMap<SessionId, SeatReservation>,
    pub(crate) reconnections: HashMap<String, ReconnectionHold>,

    pub(crate) clock: Clock,
    pub(crate) timer_callbacks: HashMap<TimerId, TimerCallback<L>>,
    pub(crate) simulation: Option<SimulationState<L>>,
    pub(crate) messages: MessageRegistry<L>,
    serializer: Box<dyn StateSerializer>,

    after_next_patch: Vec<QueuedBroadcast>,
    events: mpsc::UnboundedSender<RoomEvent>,

    pub(crate) dispose_requested: bool,
    /// Set by `disconnect()`: dispose once drained even with
    /// `auto_dispose == false`.
    pub(crate) force_dispose_when_empty: bool,
    pub(crate) disconnect_requested: Option<u16>,
    auto_dispose_deadline: Option<Instant>,
    pub(crate) on_leave_concurrent: usize,
    pub(crate) patch_rate_dirty: bool,
    pub(crate) simulation_dirty: bool,
}

/// Reconnection tokens: 16 random bytes as hex — unguessable, unique per
/// room in practice.
pub(crate) fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl<L: RoomLogic> Room<L> {
    pub(crate) fn new(
        room_id: RoomId,
        room_name: String,
        process_id: ProcessId,
        options: RoomOptions,
        dev_mode: bool,
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        Self {
            room_id,
            room_name,
            process_id,
            dev_mode,
            lifecycle: RoomLifecycle::Creating,
            max_clients: options.max_clients,
            auto_dispose: options.auto_dispose,
            patch_rate: options.patch_rate,
            seat_reservation_time: options.seat_reservation_time,
            locked: false,
            auto_locked: false,
            private: options.private,
            unlisted: options.unlisted,
            metadata: options.metadata,
            clients: Vec::new(),
            reserved_seats: HashMap::new(),
            reconnections: HashMap::new(),
            clock: Clock::new(),
            timer_callbacks: HashMap::new(),
            simulation: None,
            messages: MessageRegistry::default(),
            serializer: Box::new(JsonSerializer::new()),
            after_next_patch: Vec::new(),
            events,
            dispose_requested: false,
            force_dispose_when_empty: false,
            disconnect_requested: None,
            auto_dispose_deadline: None,
            on_leave_concurrent: 0,
            patch_rate_dirty: true,
            simulation_dirty: true,
        }
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn lifecycle(&self) -> RoomLifecycle {
        self.lifecycle
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_unlisted(&self) -> bool {
        self.unlisted
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn client(&self, session_id: &SessionId) -> Option<&Client> {
        self.clients.iter().find(|c| c.session_id == *session_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Connected clients plus unconsumed reserved seats — what the
    /// capacity invariant is measured against.
    pub fn effective_client_count(&self) -> u32 {
        let reserved = self
            .reserved_seats
            .values()
            .filter(|seat| !seat.consumed)
            .count();
        self.clients.len() as u32 + reserved as u32
    }

    pub fn has_reached_max_clients(&self) -> bool {
        self.effective_client_count() >= self.max_clients
    }

    pub(crate) fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            room_name: self.room_name.clone(),
            lifecycle: self.lifecycle,
            clients: self.clients.len() as u32,
            reserved_seats: self
                .reserved_seats
                .values()
                .filter(|seat| !seat.consumed)
                .count() as u32,
            max_clients: self.max_clients,
            locked: self.locked,
            private: self.private,
            unlisted: self.unlisted,
            metadata: self.metadata.clone(),
        }
    }

    // -----------------------------------------------------------------
    // Configuration mutators
    // -----------------------------------------------------------------

    pub fn set_max_clients(&mut self, max_clients: u32) {
        self.max_clients = max_clients;
        self.emit_client_count();
    }

    pub fn set_auto_dispose(&mut self, auto_dispose: bool) {
        self.auto_dispose = auto_dispose;
    }

    /// Changes the patch cadence; `None` disables the patch loop.
    pub fn set_patch_rate(&mut self, patch_rate: Option<Duration>) {
        self.patch_rate = patch_rate;
        self.patch_rate_dirty = true;
    }

    pub(crate) fn patch_rate(&self) -> Option<Duration> {
        self.patch_rate
    }

    pub fn set_seat_reservation_time(&mut self, ttl: Duration) {
        self.seat_reservation_time = ttl;
    }

    /// Replaces the state serializer. The state must be set again
    /// afterwards — the new serializer starts empty.
    pub fn set_serializer(&mut self, serializer: Box<dyn StateSerializer>) {
        self.serializer = serializer;
    }

    /// Replaces the replicated state tracked by the serializer.
    pub fn set_state(&mut self, state: Value) {
        self.serializer.reset(state);
    }

    pub fn serializer_id(&self) -> &'static str {
        self.serializer.id()
    }

    pub(crate) fn serializer_full_state(&mut self) -> Option<Vec<u8>> {
        self.serializer.full_state()
    }

    pub(crate) fn serializer_handshake(&self) -> Option<Vec<u8>> {
        self.serializer.handshake()
    }

    pub(crate) fn serializer_patch(&mut self) -> Option<Vec<u8>> {
        if !self.serializer.has_state() {
            return None;
        }
        self.serializer.patch()
    }

    // -----------------------------------------------------------------
    // Lock / visibility / metadata
    // -----------------------------------------------------------------

    /// Explicitly locks the room: no new seats until `unlock`.
    pub fn lock(&mut self) {
        self.auto_locked = false;
        if !self.locked {
            self.locked = true;
            let _ = self.events.send(RoomEvent::LockChanged { locked: true });
        }
    }

    pub fn unlock(&mut self) {
        self.auto_locked = false;
        if self.locked {
            self.locked = false;
            let _ = self.events.send(RoomEvent::LockChanged { locked: false });
        }
    }

    pub fn set_private(&mut self, private: bool) {
        if self.private != private {
            self.private = private;
            let _ = self.events.send(RoomEvent::VisibilityChanged { private });
        }
    }

    pub fn set_metadata(&mut self, metadata: Value) {
        self.metadata = metadata.clone();
        let _ = self.events.send(RoomEvent::MetadataChanged { metadata });
    }

    /// Applies auto-lock at capacity / auto-unlock below it. An explicit
    /// lock is never undone here.
    fn apply_capacity_lock(&mut self) {
        if !self.locked && self.has_reached_max_clients() {
            self.locked = true;
            self.auto_locked = true;
        } else if self.locked && self.auto_locked && !self.has_reached_max_clients() {
            self.locked = false;
            self.auto_locked = false;
        }
    }

    /// Re-evaluates the capacity lock and reports the effective count.
    pub(crate) fn emit_client_count(&mut self) {
        self.apply_capacity_lock();
        let _ = self.events.send(RoomEvent::ClientCountChanged {
            clients: self.effective_client_count(),
            locked: self.locked,
        });
    }

    pub(crate) fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------
    // Seats
    // -----------------------------------------------------------------

    /// Registers a provisional seat. Fails when disposing, or at capacity
    /// unless the seat is for a reconnecting client.
    pub(crate) fn reserve_seat(
        &mut self,
        session_id: SessionId,
        options: Value,
        auth: Value,
        for_reconnection: bool,
    ) -> Result<(), RoomError> {
        if self.lifecycle.is_disposing() {
            return Err(RoomError::Disposing(self.room_id.clone()));
        }
        if !for_reconnection && self.has_reached_max_clients() {
            return Err(RoomError::Full(self.room_id.clone()));
        }
        self.reserved_seats.insert(
            session_id.clone(),
            SeatReservation {
                options,
                auth,
                consumed: false,
                for_reconnection,
                deadline: Some(Instant::now() + self.seat_reservation_time),
            },
        );
        tracing::debug!(room_id = %self.room_id, %session_id, "seat reserved");
        self.emit_client_count();
        Ok(())
    }

    /// Seat released without a join (TTL expiry or auth rejection).
    pub(crate) fn release_seat(&mut self, session_id: &SessionId) {
        if self.reserved_seats.remove(session_id).is_some() {
            tracing::debug!(room_id = %self.room_id, %session_id, "seat released");
            self.emit_client_count();
            self.dispose_if_empty();
        }
    }

    // -----------------------------------------------------------------
    // Reconnection
    // -----------------------------------------------------------------

    /// Keeps the departing client's seat alive for a grace window. Call
    /// from `on_leave`; the room resolves the returned deferred when the
    /// client presents the token within the window.
    ///
    /// The held seat still counts against `max_clients`.
    pub fn allow_reconnection(
        &mut self,
        client: &Client,
        window: ReconnectionWindow,
    ) -> Reconnection {
        let token = client.reconnection_token.clone();
        let deadline = match window {
            ReconnectionWindow::Seconds(seconds) => {
                Some(Instant::now() + Duration::from_secs(seconds))
            }
            ReconnectionWindow::Manual => None,
        };
        let (resolve, receiver) = oneshot::channel();
        self.reconnections.insert(
            token.clone(),
            ReconnectionHold {
                session_id: client.session_id.clone(),
                deadline,
                resolve,
            },
        );
        // Retain the seat for the held client; the hold deadline governs.
        self.reserved_seats.insert(
            client.session_id.clone(),
            SeatReservation {
                options: Value::Null,
                auth: client.auth.clone(),
                consumed: false,
                for_reconnection: true,
                deadline: None,
            },
        );
        tracing::debug!(
            room_id = %self.room_id,
            session_id = %client.session_id,
            manual = deadline.is_none(),
            "reconnection hold registered"
        );
        Reconnection { token, receiver }
    }

    /// Rejects a manual (or pending) reconnection hold: the deferred errors
    /// and the held leave completes.
    pub fn reject_reconnection(&mut self, token: &str) {
        if let Some(hold) = self.reconnections.remove(token) {
            // Dropping `hold.resolve` rejects the deferred.
            let session_id = hold.session_id.clone();
            drop(hold);
            self.complete_held_leave(&session_id);
        }
    }

    /// Finishes the leave accounting that was withheld by a hold.
    pub(crate) fn complete_held_leave(&mut self, session_id: &SessionId) {
        self.reserved_seats.remove(session_id);
        self.emit(RoomEvent::Left {
            session_id: session_id.clone(),
        });
        self.emit_client_count();
        self.dispose_if_empty();
    }

    // -----------------------------------------------------------------
    // Messages / timers / simulation
    // -----------------------------------------------------------------

    /// Registers a handler for a message type.
    pub fn on_message(
        &mut self,
        message_type: impl Into<MessageType>,
        callback: impl FnMut(&mut L, &mut Room<L>, &Client, Value) -> Result<(), RoomError>
            + Send
            + 'static,
    ) {
        self.messages
            .register(message_type.into(), None, Box::new(callback));
    }

    /// Registers a handler with a payload validator. The validator may
    /// normalize the payload or reject it by returning an error.
    pub fn on_message_with_validation(
        &mut self,
        message_type: impl Into<MessageType>,
        validate: impl Fn(Value) -> Result<Value, RoomError> + Send + 'static,
        callback: impl FnMut(&mut L, &mut Room<L>, &Client, Value) -> Result<(), RoomError>
            + Send
            + 'static,
    ) {
        let validator: Validator = Box::new(validate);
        self.messages
            .register(message_type.into(), Some(validator), Box::new(callback));
    }

    /// Registers the wildcard handler, matched when no exact type does.
    pub fn on_message_any(
        &mut self,
        callback: impl FnMut(&mut L, &mut Room<L>, &Client, Value) -> Result<(), RoomError>
            + Send
            + 'static,
    ) {
        let callback: MessageCallback<L> = Box::new(callback);
        self.messages.register_wildcard(callback);
    }

    /// Registers a handler for a raw-bytes message type.
    pub fn on_message_bytes(
        &mut self,
        message_type: impl Into<MessageType>,
        callback: impl FnMut(&mut L, &mut Room<L>, &Client, Vec<u8>) -> Result<(), RoomError>
            + Send
            + 'static,
    ) {
        self.messages
            .register_bytes(message_type.into(), Box::new(callback));
    }

    /// Registers the wildcard raw-bytes handler.
    pub fn on_message_bytes_any(
        &mut self,
        callback: impl FnMut(&mut L, &mut Room<L>, &Client, Vec<u8>) -> Result<(), RoomError>
            + Send
            + 'static,
    ) {
        let callback: BytesCallback<L> = Box::new(callback);
        self.messages.register_bytes_wildcard(callback);
    }

    /// Replaces the simulation loop: each tick advances the clock and calls
    /// `callback` with `delta_time`.
    pub fn set_simulation_interval(
        &mut self,
        callback: impl FnMut(&mut L, &mut Room<L>, Duration) -> Result<(), RoomError>
            + Send
            + 'static,
        delay: Option<Duration>,
    ) {
        self.simulation = Some(SimulationState {
            callback: Box::new(callback),
            interval: delay.unwrap_or(DEFAULT_SIMULATION_INTERVAL),
        });
        self.simulation_dirty = true;
    }

    pub fn clear_simulation_interval(&mut self) {
        self.simulation = None;
        self.simulation_dirty = true;
    }

    /// Schedules a one-shot timer on the room clock (tick-time, so it
    /// pauses with the tick loop).
    pub fn set_timeout(
        &mut self,
        delay: Duration,
        callback: impl FnMut(&mut L, &mut Room<L>) -> Result<(), RoomError> + Send + 'static,
    ) -> TimerId {
        let id = self.clock.set_timeout(delay);
        self.timer_callbacks.insert(id, Box::new(callback));
        id
    }

    /// Schedules a repeating timer on the room clock.
    pub fn set_interval(
        &mut self,
        delay: Duration,
        callback: impl FnMut(&mut L, &mut Room<L>) -> Result<(), RoomError> + Send + 'static,
    ) -> TimerId {
        let id = self.clock.set_interval(delay);
        self.timer_callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn clear_timeout(&mut self, id: TimerId) {
        self.clock.clear_timeout(id);
        self.timer_callbacks.remove(&id);
    }

    pub fn clear_interval(&mut self, id: TimerId) {
        self.clock.clear_interval(id);
        self.timer_callbacks.remove(&id);
    }

    // -----------------------------------------------------------------
    // Broadcast / send
    // -----------------------------------------------------------------

    /// Encodes once and fans out to every `Joined`/`Reconnected` client
    /// (minus `except`).
    pub fn broadcast(
        &mut self,
        message_type: impl Into<MessageType>,
        payload: Value,
        options: BroadcastOptions,
    ) {
        let frame = Frame::RoomData {
            message_type: message_type.into(),
            payload: Some(payload),
        };
        self.broadcast_frame(&frame, options);
    }

    /// Broadcast of pre-packed bytes, skipping payload encoding.
    pub fn broadcast_bytes(
        &mut self,
        message_type: impl Into<MessageType>,
        payload: Vec<u8>,
        options: BroadcastOptions,
    ) {
        let frame = Frame::RoomDataBytes {
            message_type: message_type.into(),
            payload,
        };
        self.broadcast_frame(&frame, options);
    }

    fn broadcast_frame(&mut self, frame: &Frame, options: BroadcastOptions) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(room_id = %self.room_id, %error, "dropping unencodable broadcast");
                return;
            }
        };
        if options.after_next_patch {
            self.after_next_patch.push(QueuedBroadcast {
                bytes,
                except: options.except,
            });
        } else {
            self.fan_out(&bytes, &options.except);
        }
    }

    fn fan_out(&self, bytes: &[u8], except: &[SessionId]) {
        for client in &self.clients {
            if client.is_active() && !except.contains(&client.session_id) {
                client.send_raw(bytes.to_vec());
            }
        }
    }

    pub(crate) fn drain_after_next_patch(&mut self) {
        let queued = std::mem::take(&mut self.after_next_patch);
        for item in queued {
            self.fan_out(&item.bytes, &item.except);
        }
    }

    /// Sends a typed message to one client.
    pub fn send(
        &self,
        session_id: &SessionId,
        message_type: impl Into<MessageType>,
        payload: Value,
    ) {
        if let Some(client) = self.client(session_id) {
            client.send(&Frame::RoomData {
                message_type: message_type.into(),
                payload: Some(payload),
            });
        }
    }

    /// Sends pre-packed bytes to one client.
    pub fn send_bytes(
        &self,
        session_id: &SessionId,
        message_type: impl Into<MessageType>,
        payload: Vec<u8>,
    ) {
        if let Some(client) = self.client(session_id) {
            client.send(&Frame::RoomDataBytes {
                message_type: message_type.into(),
                payload,
            });
        }
    }

    // -----------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------

    /// Removes every client with the given close code and disposes once
    /// drained, regardless of `auto_dispose`. Takes effect when the
    /// current handler returns to the room loop.
    pub fn disconnect(&mut self, code: u16) {
        self.disconnect_requested = Some(code);
    }

    /// Convenience for `disconnect(close::CONSENTED)`.
    pub fn disconnect_all(&mut self) {
        self.disconnect(close::CONSENTED);
    }

    /// Defers auto-disposal: while the timeout is pending the room stays
    /// alive even when empty, and the emptiness check re-runs on expiry.
    pub fn reset_auto_dispose_timeout(&mut self, delay: Duration) {
        self.auto_dispose_deadline = Some(Instant::now() + delay);
    }

    /// True (and marks the dispose) iff nothing keeps the room alive: no
    /// in-flight leaves, no clients, no reserved seats, no pending
    /// auto-dispose timeout — and disposal is allowed at all.
    pub(crate) fn dispose_if_empty(&mut self) -> bool {
        let allowed = self.auto_dispose || self.force_dispose_when_empty;
        if self.on_leave_concurrent == 0
            && allowed
            && self.auto_dispose_deadline.is_none()
            && self.clients.is_empty()
            && self.reserved_seats.is_empty()
            && !self.lifecycle.is_disposing()
        {
            self.dispose_requested = true;
            return true;
        }
        false
    }

    // -----------------------------------------------------------------
    // Deadlines (driven by the actor's timer arm)
    // -----------------------------------------------------------------

    /// The earliest pending deadline: seat TTLs, reconnection windows, or
    /// the auto-dispose timeout.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let seats = self
            .reserved_seats
            .values()
            .filter(|seat| !seat.consumed)
            .filter_map(|seat| seat.deadline);
        let holds = self.reconnections.values().filter_map(|hold| hold.deadline);
        seats
            .chain(holds)
            .chain(self.auto_dispose_deadline)
            .min()
    }

    /// Reaps expired seats and reconnection holds; fires the auto-dispose
    /// re-check.
    pub(crate) fn handle_expirations(&mut self) {
        let now = Instant::now();

        let expired_seats: Vec<SessionId> = self
            .reserved_seats
            .iter()
            .filter(|(_, seat)| !seat.consumed)
            .filter(|(_, seat)| seat.deadline.is_some_and(|d| d <= now))
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in expired_seats {
            tracing::debug!(room_id = %self.room_id, %session_id, "seat reservation expired");
            self.release_seat(&session_id);
        }

        let expired_holds: Vec<String> = self
            .reconnections
            .iter()
            .filter(|(_, hold)| hold.deadline.is_some_and(|d| d <= now))
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired_holds {
            if let Some(hold) = self.reconnections.remove(&token) {
                tracing::debug!(
                    room_id = %self.room_id,
                    session_id = %hold.session_id,
                    "reconnection window expired"
                );
                let session_id = hold.session_id.clone();
                drop(hold); // rejects the deferred
                self.complete_held_leave(&session_id);
            }
        }

        if self.auto_dispose_deadline.is_some_and(|d| d <= now) {
            self.auto_dispose_deadline = None;
            self.dispose_if_empty();
        }
    }
}
