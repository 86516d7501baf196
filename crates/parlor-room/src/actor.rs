//! The room actor: one tokio task owning one room.
//!
//! The loop multiplexes four signals: commands from [`RoomHandle`]s, the
//! patch interval, the simulation interval, and the earliest pending
//! deadline (seat TTLs, reconnection windows, auto-dispose timeout). Every
//! hook and handler runs here, so all room state mutations are serialized.

use parlor_protocol::{close, error_code, Frame, MessageType, ProcessId, RoomId, SessionId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::handle::{RoomCommand, RoomEvent, RoomHandle};
use crate::messages::{Resolved, ResolvedBytes};
use crate::room::generate_token;
use crate::{
    Client, ClientRef, ClientState, JoinedInfo, Room, RoomError, RoomLifecycle, RoomLogic,
};

/// Command channel size; senders back off when a room falls this far behind.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Inputs to [`create_room`].
pub struct RoomParams {
    pub room_id: RoomId,
    pub room_name: String,
    pub process_id: ProcessId,
    /// Merged handler defaults + caller options, handed to `on_create`.
    pub create_options: Value,
    pub dev_mode: bool,
}

/// A spawned room: its handle, its event stream (bind it!), and the
/// post-`on_create` snapshot the listing is built from.
pub struct SpawnedRoom {
    pub handle: RoomHandle,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
    pub snapshot: crate::RoomSnapshot,
}

/// Instantiates a room: runs `on_create` inline (so creation failures reach
/// the caller), then spawns the actor task.
pub async fn create_room<L: RoomLogic>(
    mut logic: L,
    params: RoomParams,
) -> Result<SpawnedRoom, RoomError> {
    let (events_tx, events) = mpsc::unbounded_channel();
    let options = logic.options();
    let mut room = Room::new(
        params.room_id.clone(),
        params.room_name.clone(),
        params.process_id.clone(),
        options,
        params.dev_mode,
        events_tx,
    );
    room.clock.start();
    logic.on_create(&mut room, &params.create_options).await?;
    room.lifecycle = RoomLifecycle::Created;
    let snapshot = room.snapshot();

    let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let handle = RoomHandle::new(params.room_id.clone(), sender);
    tracing::info!(
        room_id = %params.room_id,
        room_name = %params.room_name,
        "room created"
    );

    let actor = RoomActor {
        logic,
        room,
        receiver,
        patch_interval: None,
        simulation_interval: None,
    };
    tokio::spawn(actor.run());

    Ok(SpawnedRoom {
        handle,
        events,
        snapshot,
    })
}

async fn tick_or_pending(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

struct RoomActor<L: RoomLogic> {
    logic: L,
    room: Room<L>,
    receiver: mpsc::Receiver<RoomCommand>,
    patch_interval: Option<Interval>,
    simulation_interval: Option<Interval>,
}

impl<L: RoomLogic> RoomActor<L> {
    async fn run(mut self) {
        loop {
            self.sync_intervals();
            let deadline = self.room.next_deadline();
            tokio::select! {
                command = self.receiver.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle dropped: nothing can reach this room.
                    None => self.room.dispose_requested = true,
                },
                _ = tick_or_pending(self.patch_interval.as_mut()) => self.patch(),
                _ = tick_or_pending(self.simulation_interval.as_mut()) => self.simulate(),
                _ = sleep_or_pending(deadline) => self.room.handle_expirations(),
            }
            self.process_disconnect_request().await;
            if self.room.dispose_requested && !self.room.lifecycle.is_disposing() {
                self.dispose().await;
                break;
            }
        }
    }

    /// Rebuilds the tokio intervals after a hook changed patch rate or
    /// simulation settings.
    fn sync_intervals(&mut self) {
        if self.room.patch_rate_dirty {
            self.patch_interval = self.room.patch_rate().map(|period| {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            self.room.patch_rate_dirty = false;
        }
        if self.room.simulation_dirty {
            self.simulation_interval = self.room.simulation.as_ref().map(|simulation| {
                let mut interval =
                    tokio::time::interval_at(Instant::now() + simulation.interval, simulation.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            self.room.simulation_dirty = false;
        }
    }

    fn report_uncaught(&mut self, error: RoomError, method: &'static str) {
        self.logic
            .on_uncaught_exception(&mut self.room, &error, method);
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::ReserveSeat {
                session_id,
                options,
                auth,
                for_reconnection,
                reply,
            } => {
                let result = self
                    .room
                    .reserve_seat(session_id, options, auth, for_reconnection);
                let _ = reply.send(result);
            }
            RoomCommand::Join {
                session_id,
                transport,
                reply,
            } => {
                let result = self.handle_join(session_id, transport).await;
                let _ = reply.send(result);
            }
            RoomCommand::Reconnect {
                token,
                transport,
                reply,
            } => {
                let result = self.handle_reconnect(token, transport);
                let _ = reply.send(result);
            }
            RoomCommand::Message { session_id, data } => {
                self.handle_message(session_id, data).await;
            }
            RoomCommand::TransportClosed { session_id, code } => {
                self.handle_leave(session_id, code).await;
            }
            RoomCommand::Call {
                method,
                args,
                reply,
            } => {
                let result = self.dispatch_call(method, args).await;
                let _ = reply.send(result);
            }
            RoomCommand::Lock { reply } => {
                self.room.lock();
                let _ = reply.send(());
            }
            RoomCommand::Unlock { reply } => {
                self.room.unlock();
                let _ = reply.send(());
            }
            RoomCommand::SetPrivate { private, reply } => {
                self.room.set_private(private);
                let _ = reply.send(());
            }
            RoomCommand::SetMetadata { metadata, reply } => {
                self.room.set_metadata(metadata);
                let _ = reply.send(());
            }
            RoomCommand::Disconnect { code, reply } => {
                self.room.disconnect_requested = None;
                self.force_disconnect(code).await;
                let _ = reply.send(Ok(()));
            }
            RoomCommand::BeforeShutdown { code, reply } => {
                self.room.lock();
                self.logic.on_before_shutdown(&mut self.room).await;
                self.room.disconnect_requested = None;
                self.force_disconnect(code).await;
                let _ = reply.send(());
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
        }
    }

    /// The whitelisted string-method dispatcher: what remote processes may
    /// invoke over the room's IPC topic.
    async fn dispatch_call(
        &mut self,
        method: String,
        args: Vec<Value>,
    ) -> Result<Value, RoomError> {
        match method.as_str() {
            "_reserveSeat" => {
                let session_id = args
                    .first()
                    .and_then(|v| v.as_str())
                    .map(SessionId::from)
                    .ok_or_else(|| {
                        RoomError::InvalidPayload("_reserveSeat expects a session id".into())
                    })?;
                let options = args.get(1).cloned().unwrap_or(Value::Null);
                let auth = args.get(2).cloned().unwrap_or(Value::Null);
                let for_reconnection = args.get(3).and_then(|v| v.as_bool()).unwrap_or(false);
                self.room
                    .reserve_seat(session_id, options, auth, for_reconnection)?;
                Ok(Value::Bool(true))
            }
            "lock" => {
                self.room.lock();
                Ok(Value::Null)
            }
            "unlock" => {
                self.room.unlock();
                Ok(Value::Null)
            }
            "setPrivate" => {
                let private = args.first().and_then(|v| v.as_bool()).unwrap_or(true);
                self.room.set_private(private);
                Ok(Value::Null)
            }
            "setMetadata" => {
                let metadata = args.first().cloned().unwrap_or(Value::Null);
                self.room.set_metadata(metadata);
                Ok(Value::Null)
            }
            "disconnect" => {
                let code = args
                    .first()
                    .and_then(|v| v.as_u64())
                    .map(|code| code as u16)
                    .unwrap_or(close::CONSENTED);
                self.room.disconnect_requested = None;
                self.force_disconnect(code).await;
                Ok(Value::Null)
            }
            other => Err(RoomError::UnknownMethod(other.to_string())),
        }
    }

    // -----------------------------------------------------------------
    // Join / reconnect / leave
    // -----------------------------------------------------------------

    async fn handle_join(
        &mut self,
        session_id: SessionId,
        transport: ClientRef,
    ) -> Result<JoinedInfo, RoomError> {
        if self.room.lifecycle.is_disposing() {
            return Err(RoomError::Disposing(self.room.room_id().clone()));
        }
        let (seat_options, seat_auth) = {
            let seat = self
                .room
                .reserved_seats
                .get_mut(&session_id)
                .ok_or_else(|| RoomError::SeatNotReserved(session_id.clone()))?;
            if seat.consumed || (seat.for_reconnection && seat.deadline.is_none()) {
                // Already used, or held for a RECONNECT frame.
                return Err(RoomError::SeatNotReserved(session_id.clone()));
            }
            seat.consumed = true;
            (seat.options.clone(), seat.auth.clone())
        };

        let token = generate_token();
        let mut client = Client {
            session_id: session_id.clone(),
            reconnection_token: token.clone(),
            auth: seat_auth,
            user_data: Value::Null,
            state: ClientState::Joining,
            transport,
        };

        match self.logic.on_auth(&mut self.room, &client, &seat_options).await {
            Ok(auth) => {
                if !auth.is_null() {
                    client.auth = auth;
                }
            }
            Err(error) => {
                let message = error.to_string();
                self.report_uncaught(error, "on_auth");
                // The seat is consumed: no retry with this session id.
                self.room.release_seat(&session_id);
                client.state = ClientState::Leaving;
                self.room.on_leave_concurrent += 1;
                let leave_result = self.logic.on_leave(&mut self.room, &client, true).await;
                self.room.on_leave_concurrent -= 1;
                if let Err(leave_error) = leave_result {
                    self.report_uncaught(leave_error, "on_leave");
                }
                client.error(error_code::AUTH_FAILED, &message);
                client.close(close::WITH_ERROR);
                return Err(RoomError::AuthRejected(message));
            }
        }

        client.send(&Frame::JoinRoom {
            reconnection_token: token.clone(),
            serializer_id: self.room.serializer_id().to_string(),
            handshake: self.room.serializer_handshake(),
        });
        if let Some(state) = self.room.serializer_full_state() {
            client.send(&Frame::RoomState(state));
        }

        client.state = ClientState::Joined;
        let snapshot = client.clone();
        self.room.clients.push(client);
        self.room.reserved_seats.remove(&session_id);
        // Counted as joined from here on, so a failed on_join below still
        // balances against the Left its leave emits.
        self.room.emit(RoomEvent::Joined {
            session_id: session_id.clone(),
        });

        if let Err(error) = self.logic.on_join(&mut self.room, &snapshot).await {
            let message = error.to_string();
            self.report_uncaught(error, "on_join");
            snapshot.error(error_code::APPLICATION_ERROR, &message);
            snapshot.close(close::WITH_ERROR);
            self.handle_leave(session_id, close::WITH_ERROR).await;
            return Err(RoomError::App(message));
        }

        tracing::debug!(
            room_id = %self.room.room_id(),
            %session_id,
            clients = self.room.client_count(),
            "client joined"
        );

        Ok(JoinedInfo {
            session_id,
            reconnection_token: token,
        })
    }

    fn handle_reconnect(
        &mut self,
        token: String,
        transport: ClientRef,
    ) -> Result<JoinedInfo, RoomError> {
        if self.room.lifecycle.is_disposing() {
            return Err(RoomError::Disposing(self.room.room_id().clone()));
        }
        let hold = self
            .room
            .reconnections
            .remove(&token)
            .ok_or(RoomError::InvalidReconnectionToken)?;
        if hold.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            let session_id = hold.session_id.clone();
            drop(hold);
            self.room.complete_held_leave(&session_id);
            return Err(RoomError::InvalidReconnectionToken);
        }
        let session_id = hold.session_id.clone();
        let seat = self
            .room
            .reserved_seats
            .remove(&session_id)
            .ok_or(RoomError::InvalidReconnectionToken)?;

        // Tokens are single-use: mint a fresh one for the resumed session.
        let new_token = generate_token();
        let client = Client {
            session_id: session_id.clone(),
            reconnection_token: new_token.clone(),
            auth: seat.auth,
            user_data: Value::Null,
            state: ClientState::Reconnected,
            transport,
        };

        client.send(&Frame::JoinRoom {
            reconnection_token: new_token.clone(),
            serializer_id: self.room.serializer_id().to_string(),
            handshake: self.room.serializer_handshake(),
        });
        if let Some(state) = self.room.serializer_full_state() {
            client.send(&Frame::RoomState(state));
        }

        self.room.clients.push(client.clone());
        // Resolve the deferred `allow_reconnection` handed out in on_leave.
        let _ = hold.resolve.send(client);

        tracing::debug!(
            room_id = %self.room.room_id(),
            %session_id,
            "client reconnected"
        );

        Ok(JoinedInfo {
            session_id,
            reconnection_token: new_token,
        })
    }

    async fn handle_leave(&mut self, session_id: SessionId, code: u16) {
        let Some(index) = self
            .room
            .clients
            .iter()
            .position(|client| client.session_id == session_id)
        else {
            return;
        };
        let mut client = self.room.clients.remove(index);
        client.state = ClientState::Leaving;
        let consented = code == close::CONSENTED;

        self.room.on_leave_concurrent += 1;
        let result = self.logic.on_leave(&mut self.room, &client, consented).await;
        self.room.on_leave_concurrent -= 1;
        if let Err(error) = result {
            self.report_uncaught(error, "on_leave");
        }

        // A hold registered during on_leave withholds the after-leave
        // accounting until it resolves or expires.
        if self
            .room
            .reconnections
            .contains_key(&client.reconnection_token)
        {
            return;
        }

        tracing::debug!(
            room_id = %self.room.room_id(),
            %session_id,
            consented,
            clients = self.room.client_count(),
            "client left"
        );
        self.room.reserved_seats.remove(&session_id);
        self.room.emit(RoomEvent::Left {
            session_id: session_id.clone(),
        });
        self.room.emit_client_count();
        self.room.dispose_if_empty();
    }

    /// Removes every client (and pending hold/seat) with `code`; the room
    /// disposes once drained even when `auto_dispose` is off.
    async fn force_disconnect(&mut self, code: u16) {
        self.room.force_dispose_when_empty = true;
        let sessions: Vec<SessionId> = self
            .room
            .clients
            .iter()
            .map(|client| client.session_id.clone())
            .collect();
        for session_id in sessions {
            if let Some(client) = self.room.client(&session_id) {
                client.send(&Frame::LeaveRoom);
                client.close(code);
            }
            self.handle_leave(session_id, code).await;
        }
        let tokens: Vec<String> = self.room.reconnections.keys().cloned().collect();
        for token in tokens {
            self.room.reject_reconnection(&token);
        }
        let seats: Vec<SessionId> = self.room.reserved_seats.keys().cloned().collect();
        for session_id in seats {
            self.room.release_seat(&session_id);
        }
        self.room.dispose_if_empty();
    }

    async fn process_disconnect_request(&mut self) {
        if let Some(code) = self.room.disconnect_requested.take() {
            self.force_disconnect(code).await;
        }
    }

    // -----------------------------------------------------------------
    // Message dispatch
    // -----------------------------------------------------------------

    async fn handle_message(&mut self, session_id: SessionId, data: Vec<u8>) {
        let Some(client) = self.room.client(&session_id).cloned() else {
            tracing::debug!(
                room_id = %self.room.room_id(),
                %session_id,
                "message from unknown session, ignoring"
            );
            return;
        };
        if client.state == ClientState::Leaving {
            return;
        }
        match Frame::decode(&data) {
            Ok(Frame::RoomData {
                message_type,
                payload,
            }) => {
                self.dispatch_typed(client, message_type, payload.unwrap_or(Value::Null));
            }
            Ok(Frame::RoomDataBytes {
                message_type,
                payload,
            }) => {
                self.dispatch_bytes(client, message_type, payload);
            }
            Ok(Frame::LeaveRoom) => {
                // Client-initiated voluntary leave.
                client.close(close::CONSENTED);
                self.handle_leave(session_id, close::CONSENTED).await;
            }
            Ok(_) => self.invalid_payload(&client, "unexpected frame"),
            Err(error) => self.invalid_payload(&client, &error.to_string()),
        }
    }

    fn invalid_payload(&mut self, client: &Client, message: &str) {
        if self.room.dev_mode() {
            client.error(error_code::INVALID_PAYLOAD, message);
        } else {
            client.close(close::WITH_ERROR);
        }
    }

    fn dispatch_typed(&mut self, client: Client, message_type: MessageType, payload: Value) {
        let mut taken = match self.room.messages.take(&message_type) {
            Resolved::Missing => {
                self.missing_handler(&client, &message_type);
                return;
            }
            taken => taken,
        };
        let handler = match &mut taken {
            Resolved::Exact(handler) | Resolved::Wildcard(handler) => handler,
            Resolved::Missing => unreachable!("missing handled above"),
        };

        let validated = match &handler.validate {
            Some(validate) => validate(payload),
            None => Ok(payload),
        };
        match validated {
            Ok(payload) => {
                if let Err(error) =
                    (handler.callback)(&mut self.logic, &mut self.room, &client, payload)
                {
                    self.report_uncaught(error, "on_message");
                    client.close(close::WITH_ERROR);
                }
            }
            Err(error) => {
                self.report_uncaught(error, "on_message");
                client.close(close::WITH_ERROR);
            }
        }
        self.room.messages.restore(&message_type, taken);
    }

    fn dispatch_bytes(&mut self, client: Client, message_type: MessageType, payload: Vec<u8>) {
        let mut taken = match self.room.messages.take_bytes(&message_type) {
            ResolvedBytes::Missing => {
                self.missing_handler(&client, &message_type);
                return;
            }
            taken => taken,
        };
        let callback = match &mut taken {
            ResolvedBytes::Exact(callback) | ResolvedBytes::Wildcard(callback) => callback,
            ResolvedBytes::Missing => unreachable!("missing handled above"),
        };

        if let Err(error) = callback(&mut self.logic, &mut self.room, &client, payload) {
            self.report_uncaught(error, "on_message");
            client.close(close::WITH_ERROR);
        }
        self.room.messages.restore_bytes(&message_type, taken);
    }

    fn missing_handler(&mut self, client: &Client, message_type: &MessageType) {
        tracing::debug!(
            room_id = %self.room.room_id(),
            session_id = %client.session_id,
            %message_type,
            "no handler for message type"
        );
        self.invalid_payload(
            client,
            &format!("no message handler for type {message_type}"),
        );
    }

    // -----------------------------------------------------------------
    // Tick & patch
    // -----------------------------------------------------------------

    /// Advances the clock and fires due user timers.
    fn run_clock_tick(&mut self) {
        for timer_id in self.room.clock.tick() {
            if let Some(mut callback) = self.room.timer_callbacks.remove(&timer_id) {
                if let Err(error) = callback(&mut self.logic, &mut self.room) {
                    self.report_uncaught(error, "timed_event");
                }
                // Intervals stay scheduled in the clock; one-shots are gone.
                if self.room.clock.has_timer(timer_id)
                    && !self.room.timer_callbacks.contains_key(&timer_id)
                {
                    self.room.timer_callbacks.insert(timer_id, callback);
                }
            }
        }
    }

    fn simulate(&mut self) {
        self.run_clock_tick();
        let Some(mut simulation) = self.room.simulation.take() else {
            return;
        };
        let delta = self.room.clock.delta_time();
        if let Err(error) = (simulation.callback)(&mut self.logic, &mut self.room, delta) {
            self.report_uncaught(error, "simulation_interval");
        }
        // Restore unless the callback replaced or cleared the interval.
        if self.room.simulation.is_none() && !self.room.simulation_dirty {
            self.room.simulation = Some(simulation);
        }
    }

    fn patch(&mut self) {
        self.logic.on_before_patch(&mut self.room);
        // Without a simulation loop, the patch loop drives the clock
        // (never both — that would double-tick).
        if self.room.simulation.is_none() {
            self.run_clock_tick();
        }
        if let Some(bytes) = self.room.serializer_patch() {
            let frame = Frame::RoomStatePatch(bytes);
            if let Ok(encoded) = frame.encode() {
                for client in self.room.clients() {
                    if client.is_active() {
                        client.send_raw(encoded.clone());
                    }
                }
            }
        }
        self.room.drain_after_next_patch();
    }

    // -----------------------------------------------------------------
    // Disposal
    // -----------------------------------------------------------------

    async fn dispose(&mut self) {
        self.room.lifecycle = RoomLifecycle::Disposing;
        self.room.emit(RoomEvent::Disposing);

        if let Err(error) = self.logic.on_dispose(&mut self.room).await {
            self.report_uncaught(error, "on_dispose");
        }

        self.patch_interval = None;
        self.simulation_interval = None;
        self.room.simulation = None;
        self.room.timer_callbacks.clear();
        self.room.clock.clear();
        self.room.clock.stop();

        // Normally the room is already empty here; belt for stragglers.
        for client in self.room.clients() {
            client.send(&Frame::LeaveRoom);
            client.close(close::CONSENTED);
        }

        self.room.emit(RoomEvent::Disposed);
        tracing::info!(room_id = %self.room.room_id(), "room disposed");
    }
}
