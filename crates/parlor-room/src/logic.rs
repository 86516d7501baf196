//! The [`RoomLogic`] trait — the extension point room developers implement.
//!
//! Every hook is optional. Hooks that may suspend return
//! `impl Future + Send` (implement them with plain `async fn`); they run on
//! the room's task, so state mutations stay serialized. Hook failures never
//! unwind the room: they are routed to
//! [`on_uncaught_exception`](RoomLogic::on_uncaught_exception) with the name
//! of the originating method, and the room keeps running unless the hook
//! escalates with [`Room::disconnect`].

use std::future::Future;

use serde_json::Value;

use crate::{Client, Room, RoomError, RoomOptions};

/// User-supplied room behavior.
///
/// The struct implementing this holds the room's game state; the framework
/// hands it back (`&mut self`) together with the [`Room`] on every hook,
/// timer and message handler.
pub trait RoomLogic: Send + Sized + 'static {
    /// Configuration the room starts with. Most of it can still be changed
    /// from `on_create` via the [`Room`] mutators.
    fn options(&self) -> RoomOptions {
        RoomOptions::default()
    }

    /// Room initialization: register message handlers, set up state and
    /// intervals. An error here fails the matchmaking create call.
    fn on_create(
        &mut self,
        room: &mut Room<Self>,
        options: &Value,
    ) -> impl Future<Output = Result<(), RoomError>> + Send {
        let _ = (room, options);
        async { Ok(()) }
    }

    /// Authenticates a joining client against its seat options. Returning
    /// a non-null value stores it as `client.auth`. An error rejects the
    /// join (and consumes the seat).
    fn on_auth(
        &mut self,
        room: &mut Room<Self>,
        client: &Client,
        options: &Value,
    ) -> impl Future<Output = Result<Value, RoomError>> + Send {
        let _ = (room, client, options);
        async { Ok(Value::Null) }
    }

    /// A client completed the join sequence.
    fn on_join(
        &mut self,
        room: &mut Room<Self>,
        client: &Client,
    ) -> impl Future<Output = Result<(), RoomError>> + Send {
        let _ = (room, client);
        async { Ok(()) }
    }

    /// A client is leaving; `consented` distinguishes a voluntary close.
    /// Call [`Room::allow_reconnection`] here to hold the seat for a grace
    /// window.
    fn on_leave(
        &mut self,
        room: &mut Room<Self>,
        client: &Client,
        consented: bool,
    ) -> impl Future<Output = Result<(), RoomError>> + Send {
        let _ = (room, client, consented);
        async { Ok(()) }
    }

    /// The room is being torn down; last chance to persist anything.
    fn on_dispose(
        &mut self,
        room: &mut Room<Self>,
    ) -> impl Future<Output = Result<(), RoomError>> + Send {
        let _ = room;
        async { Ok(()) }
    }

    /// Runs right before each patch broadcast.
    fn on_before_patch(&mut self, room: &mut Room<Self>) {
        let _ = room;
    }

    /// Graceful-shutdown notice. After this hook returns, the room is
    /// drained with the shutdown close code and disposed.
    fn on_before_shutdown(&mut self, room: &mut Room<Self>) -> impl Future<Output = ()> + Send {
        let _ = room;
        async {}
    }

    /// Receives every wrapped failure from hooks, timers, the simulation
    /// callback and message handlers. `method` names the origin
    /// (`"on_message"`, `"simulation_interval"`, `"timed_event"`,
    /// `"on_join"`, `"on_leave"`, `"on_create"`, `"on_dispose"`,
    /// `"on_auth"`). Default: log and continue.
    fn on_uncaught_exception(&mut self, room: &mut Room<Self>, error: &RoomError, method: &str) {
        tracing::error!(
            room_id = %room.room_id(),
            method,
            %error,
            "uncaught exception in room handler"
        );
    }
}
