//! The matchmaker: per-process coordinator for room creation, seat
//! reservation, cross-process routing, and graceful shutdown.
//!
//! One [`Matchmaker`] per process. It owns the handler registry and the
//! local rooms map; everything fleet-wide goes through the
//! [`Presence`](parlor_presence::Presence) backend — the `roomcount`
//! registry hash, the `ch:`/`l:` create-path rendezvous, and the
//! `p:<processId>` / `$<roomId>` IPC inboxes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use parlor_driver::{CacheUpdate, Driver, Query, RoomCache, RoomListing, SortBy};
use parlor_presence::{ipc, IpcError, Presence};
use parlor_protocol::{close, ProcessId, RoomId, SessionId};
use parlor_room::{
    create_room, ClientRef, JoinedInfo, RoomError, RoomEvent, RoomHandle, RoomLogic, RoomParams,
    SpawnedRoom,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::selector::{LowestRoomCount, ProcessSelector};
use crate::stats::Stats;
use crate::{MatchmakerError, ProcessStats};

/// How long a create-path follower waits for the winner's rendezvous push
/// before proceeding as if uncontended.
const MAX_CREATE_WAIT: Duration = Duration::from_secs(2);

fn process_topic(process_id: &ProcessId) -> String {
    format!("p:{process_id}")
}

fn room_topic(room_id: &RoomId) -> String {
    format!("${room_id}")
}

/// The rendezvous key all concurrent creators for the same room type and
/// options share. `serde_json` maps are sorted, so this is canonical.
fn concurrency_key(options: &Value) -> String {
    options.to_string()
}

/// Shallow-merges caller options over handler defaults.
fn merge_options(defaults: &Value, options: &Value) -> Value {
    match (defaults, options) {
        (Value::Object(defaults), Value::Object(options)) => {
            let mut merged = defaults.clone();
            for (key, value) in options {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (Value::Null, options) => options.clone(),
        (defaults, Value::Null) => defaults.clone(),
        (_, options) => options.clone(),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Process-level matchmaker configuration.
pub struct MatchmakerConfig {
    /// Stable process id; minted at random when absent.
    pub process_id: Option<ProcessId>,
    /// Address clients use to reach this process (goes into listings).
    pub public_address: Option<String>,
    /// Dev mode: malformed messages get error replies instead of closes,
    /// and local presence may snapshot/restore.
    pub dev_mode: bool,
    /// Exclude unresponsive processes on IPC timeout and retry locally.
    pub health_checks: bool,
    /// Close code used when draining rooms at shutdown.
    pub shutdown_close_code: u16,
    /// Process-selection policy for new rooms.
    pub selector: Box<dyn ProcessSelector>,
}

impl Default for MatchmakerConfig {
    fn default() -> Self {
        Self {
            process_id: None,
            public_address: None,
            dev_mode: false,
            health_checks: true,
            shutdown_close_code: close::CONSENTED,
            selector: Box::new(LowestRoomCount),
        }
    }
}

/// Matchmaker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchmakerState {
    Running,
    ShuttingDown,
}

const STATE_RUNNING: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;

/// Per-handler registration: factory plus matchmaking hints.
pub struct DefineOptions {
    /// Defaults shallow-merged under every caller's options.
    pub default_options: Value,
    /// Option keys matched against listing metadata when finding a room.
    pub filter_by: Vec<String>,
    /// Listing order for `find_one_room_available`.
    pub sort_by: SortBy,
}

impl Default for DefineOptions {
    fn default() -> Self {
        Self {
            default_options: Value::Null,
            filter_by: Vec::new(),
            sort_by: SortBy::default(),
        }
    }
}

/// A successful matchmaking result: where to connect, as whom.
#[derive(Debug, Clone)]
pub struct SeatReservation {
    pub room: RoomListing,
    pub session_id: SessionId,
}

type RoomFactory =
    Box<dyn Fn(RoomParams) -> BoxFuture<'static, Result<SpawnedRoom, RoomError>> + Send + Sync>;

struct RegisteredHandler {
    factory: RoomFactory,
    default_options: Value,
    filter_by: Vec<String>,
    sort_by: SortBy,
}

struct LocalRoom {
    handle: RoomHandle,
    ipc_task: JoinHandle<()>,
}

struct Inner<P: Presence, D: Driver> {
    process_id: ProcessId,
    public_address: Option<String>,
    dev_mode: bool,
    health_checks: bool,
    shutdown_close_code: u16,
    presence: Arc<P>,
    driver: Arc<D>,
    selector: Box<dyn ProcessSelector>,
    handlers: RwLock<HashMap<String, RegisteredHandler>>,
    rooms: DashMap<RoomId, LocalRoom>,
    stats: Arc<Stats<P>>,
    state: AtomicU8,
    no_active_rooms: Notify,
    inbox_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Per-process matchmaking coordinator. Cheap to clone.
pub struct Matchmaker<P: Presence, D: Driver> {
    inner: Arc<Inner<P, D>>,
}

impl<P: Presence, D: Driver> Clone for Matchmaker<P, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Presence, D: Driver> Matchmaker<P, D> {
    /// Builds the matchmaker, registers the process in the fleet, and
    /// starts listening on its IPC inbox.
    pub async fn create(
        presence: Arc<P>,
        driver: Arc<D>,
        config: MatchmakerConfig,
    ) -> Result<Self, MatchmakerError> {
        let process_id = config.process_id.unwrap_or_else(ProcessId::generate);
        let stats = Arc::new(Stats::new(Arc::clone(&presence), process_id.clone()));

        let matchmaker = Self {
            inner: Arc::new(Inner {
                process_id: process_id.clone(),
                public_address: config.public_address,
                dev_mode: config.dev_mode,
                health_checks: config.health_checks,
                shutdown_close_code: config.shutdown_close_code,
                presence,
                driver,
                selector: config.selector,
                handlers: RwLock::new(HashMap::new()),
                rooms: DashMap::new(),
                stats,
                state: AtomicU8::new(STATE_RUNNING),
                no_active_rooms: Notify::new(),
                inbox_task: StdMutex::new(None),
            }),
        };

        // Appear in the registry before anything can be routed here.
        matchmaker.inner.stats.flush_now().await?;
        let inbox = matchmaker.spawn_process_inbox().await?;
        *matchmaker
            .inner
            .inbox_task
            .lock()
            .expect("inbox task lock poisoned") = Some(inbox);

        tracing::info!(%process_id, "matchmaker ready");
        Ok(matchmaker)
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.inner.process_id
    }

    pub fn state(&self) -> MatchmakerState {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_SHUTTING_DOWN => MatchmakerState::ShuttingDown,
            _ => MatchmakerState::Running,
        }
    }

    /// Number of rooms hosted by this process.
    pub fn local_room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    /// Handle to a locally hosted room, for transport adapters.
    pub fn room_handle(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.inner.rooms.get(room_id).map(|room| room.handle.clone())
    }

    /// Connected clients on this process.
    pub fn local_ccu(&self) -> i64 {
        self.inner.stats.ccu()
    }

    /// Connected clients across the fleet (reads the stats hash).
    pub async fn global_ccu(&self) -> Result<i64, MatchmakerError> {
        Ok(self.inner.stats.global_ccu().await?)
    }

    /// The fleet view from the process registry.
    pub async fn process_stats(&self) -> Result<Vec<ProcessStats>, MatchmakerError> {
        Ok(self.inner.stats.fetch_all().await?)
    }

    fn ensure_accepting(&self) -> Result<(), MatchmakerError> {
        match self.state() {
            MatchmakerState::Running => Ok(()),
            MatchmakerState::ShuttingDown => Err(MatchmakerError::ShuttingDown),
        }
    }

    // -----------------------------------------------------------------
    // Handler registration
    // -----------------------------------------------------------------

    /// Registers a room type under a name.
    pub fn define<L, F>(&self, room_name: &str, factory: F)
    where
        L: RoomLogic,
        F: Fn(&Value) -> L + Send + Sync + 'static,
    {
        self.define_with(room_name, factory, DefineOptions::default());
    }

    /// Registers a room type with default options and matchmaking hints.
    pub fn define_with<L, F>(&self, room_name: &str, factory: F, options: DefineOptions)
    where
        L: RoomLogic,
        F: Fn(&Value) -> L + Send + Sync + 'static,
    {
        let factory: RoomFactory = Box::new(move |params| {
            let logic = factory(&params.create_options);
            Box::pin(create_room(logic, params))
        });
        self.inner
            .handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(
                room_name.to_string(),
                RegisteredHandler {
                    factory,
                    default_options: options.default_options,
                    filter_by: options.filter_by,
                    sort_by: options.sort_by,
                },
            );
        tracing::debug!(room_name, "room handler defined");
    }

    fn ensure_handler(&self, room_name: &str) -> Result<(), MatchmakerError> {
        let handlers = self
            .inner
            .handlers
            .read()
            .expect("handler registry lock poisoned");
        if handlers.contains_key(room_name) {
            Ok(())
        } else {
            Err(MatchmakerError::NoHandler(room_name.to_string()))
        }
    }

    // -----------------------------------------------------------------
    // Public matchmaking operations
    // -----------------------------------------------------------------

    /// Joins an available room, or creates one when none matches. Under
    /// contention, concurrent callers rendezvous on a fleet-wide slot so
    /// exactly one room is created.
    pub async fn join_or_create(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<SeatReservation, MatchmakerError> {
        self.ensure_accepting()?;
        self.ensure_handler(room_name)?;
        let listing = self.acquire_room_for_join(room_name, &options).await?;
        self.reserve_seat_in(listing, options, auth).await
    }

    /// Joins an available room; never creates.
    pub async fn join(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<SeatReservation, MatchmakerError> {
        self.ensure_accepting()?;
        self.ensure_handler(room_name)?;
        let listing = self
            .find_one_available(room_name, &options)
            .await?
            .ok_or_else(|| MatchmakerError::RoomNotFound(room_name.to_string()))?;
        self.reserve_seat_in(listing, options, auth).await
    }

    /// Joins one specific room by id.
    pub async fn join_by_id(
        &self,
        room_id: &RoomId,
        options: Value,
        auth: Value,
    ) -> Result<SeatReservation, MatchmakerError> {
        self.ensure_accepting()?;
        let listing = self
            .inner
            .driver
            .find_one(&Query::by_room_id(room_id.clone()), None)
            .await?
            .ok_or_else(|| MatchmakerError::InvalidRoomId(room_id.clone()))?;
        if listing.locked {
            return Err(MatchmakerError::SeatReservation(format!(
                "room {room_id} is locked"
            )));
        }
        self.reserve_seat_in(listing, options, auth).await
    }

    /// Always creates a new room (on the selected process), then reserves.
    pub async fn create(
        &self,
        room_name: &str,
        options: Value,
        auth: Value,
    ) -> Result<SeatReservation, MatchmakerError> {
        self.ensure_accepting()?;
        self.ensure_handler(room_name)?;
        let listing = self.create_on_selected_process(room_name, &options).await?;
        self.reserve_seat_in(listing, options, auth).await
    }

    /// Queries listings across the fleet.
    pub async fn query(&self, query: &Query) -> Result<Vec<RoomListing>, MatchmakerError> {
        Ok(self.inner.driver.query(query, None).await?)
    }

    /// Invokes a whitelisted method on a room, local or remote.
    pub async fn remote_room_call(
        &self,
        room_id: &RoomId,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, MatchmakerError> {
        self.room_call(room_id, method, args, ipc::LONG_TIMEOUT).await
    }

    async fn room_call(
        &self,
        room_id: &RoomId,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, MatchmakerError> {
        if let Some(handle) = self.room_handle(room_id) {
            return Ok(handle.call(method, args).await?);
        }
        Ok(ipc::request(
            &*self.inner.presence,
            &room_topic(room_id),
            method,
            args,
            timeout,
        )
        .await?)
    }

    /// Tears down a room (administrative).
    pub async fn dispose_room(&self, room_id: &RoomId) -> Result<(), MatchmakerError> {
        self.remote_room_call(room_id, "disconnect", vec![json!(close::CONSENTED)])
            .await?;
        Ok(())
    }

    /// Probes a remote process's inbox with the short IPC bound.
    pub async fn health_check(&self, process_id: &ProcessId) -> bool {
        ipc::request(
            &*self.inner.presence,
            &process_topic(process_id),
            "ping",
            Vec::new(),
            ipc::SHORT_TIMEOUT,
        )
        .await
        .is_ok()
    }

    /// Removes a process from the registry and reaps its cached rooms.
    pub async fn exclude_process(&self, process_id: &ProcessId) -> Result<(), MatchmakerError> {
        tracing::warn!(%process_id, "excluding process from the fleet");
        self.inner.stats.exclude(process_id).await?;
        self.inner.driver.cleanup(process_id).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Transport entry points
    // -----------------------------------------------------------------

    /// Consumes a seat reservation: runs the join sequence on the (local)
    /// room the transport connected to.
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        session_id: SessionId,
        transport: ClientRef,
    ) -> Result<JoinedInfo, MatchmakerError> {
        let handle = self
            .room_handle(room_id)
            .ok_or_else(|| MatchmakerError::InvalidRoomId(room_id.clone()))?;
        handle
            .join(session_id, transport)
            .await
            .map_err(|error| match error {
                RoomError::SeatNotReserved(_) => MatchmakerError::Expired,
                RoomError::AuthRejected(message) => MatchmakerError::Auth(message),
                other => other.into(),
            })
    }

    /// Resumes a held session on a local room with a reconnection token.
    pub async fn reconnect_room(
        &self,
        room_id: &RoomId,
        token: String,
        transport: ClientRef,
    ) -> Result<JoinedInfo, MatchmakerError> {
        let handle = self
            .room_handle(room_id)
            .ok_or_else(|| MatchmakerError::InvalidRoomId(room_id.clone()))?;
        Ok(handle.reconnect(token, transport).await?)
    }

    // -----------------------------------------------------------------
    // Create path
    // -----------------------------------------------------------------

    /// Finds or creates a room for `join_or_create`, under the fleet-wide
    /// concurrency slot: the winner does the work and pushes one listing
    /// copy per waiter onto the rendezvous list.
    async fn acquire_room_for_join(
        &self,
        room_name: &str,
        options: &Value,
    ) -> Result<RoomListing, MatchmakerError> {
        let presence = &*self.inner.presence;
        let slot_key = format!("ch:{room_name}");
        let rendezvous = concurrency_key(options);
        let list_key = format!("l:{room_name}:{rendezvous}");

        let contenders = presence
            .hincrbyex(&slot_key, &rendezvous, 1, MAX_CREATE_WAIT.as_secs() * 2)
            .await?;

        let result = if contenders > 1 {
            // Follower: wait for the winner's push. A timeout means we woke
            // late — proceed as if uncontended (retry-safe).
            match presence
                .brpop(&[list_key.as_str()], MAX_CREATE_WAIT.as_secs_f64())
                .await?
            {
                Some((_, payload)) => serde_json::from_str::<RoomListing>(&payload)
                    .map_err(|error| MatchmakerError::Matchmaking(error.to_string())),
                None => {
                    tracing::debug!(room_name, "create rendezvous timed out, proceeding alone");
                    self.find_or_create(room_name, options).await
                }
            }
        } else {
            let outcome = self.find_or_create(room_name, options).await;
            if let Ok(listing) = &outcome {
                // One copy per waiter registered on the slot by now.
                let waiters = presence
                    .hget(&slot_key, &rendezvous)
                    .await?
                    .and_then(|value| value.parse::<i64>().ok())
                    .unwrap_or(1)
                    - 1;
                if waiters > 0 {
                    let payload = serde_json::to_string(listing)
                        .map_err(|error| MatchmakerError::Matchmaking(error.to_string()))?;
                    for _ in 0..waiters {
                        presence.rpush(&list_key, &payload).await?;
                    }
                    // Unclaimed copies die with the list.
                    presence
                        .expire(&list_key, MAX_CREATE_WAIT.as_secs() * 2)
                        .await?;
                }
            }
            outcome
        };

        // Release the slot; the last one out deletes it.
        let remaining = presence.hincrby(&slot_key, &rendezvous, -1).await?;
        if remaining <= 0 {
            let _ = presence.hdel(&slot_key, &rendezvous).await;
        }

        result
    }

    async fn find_or_create(
        &self,
        room_name: &str,
        options: &Value,
    ) -> Result<RoomListing, MatchmakerError> {
        if let Some(listing) = self.find_one_available(room_name, options).await? {
            return Ok(listing);
        }
        self.create_on_selected_process(room_name, options).await
    }

    /// The default join filter plus the handler's `filter_by`/`sort_by`.
    async fn find_one_available(
        &self,
        room_name: &str,
        options: &Value,
    ) -> Result<Option<RoomListing>, MatchmakerError> {
        let (filter_by, sort_by) = {
            let handlers = self
                .inner
                .handlers
                .read()
                .expect("handler registry lock poisoned");
            let handler = handlers
                .get(room_name)
                .ok_or_else(|| MatchmakerError::NoHandler(room_name.to_string()))?;
            (handler.filter_by.clone(), handler.sort_by.clone())
        };

        let mut query = Query::for_join(room_name);
        for key in &filter_by {
            if let Some(value) = options.get(key) {
                query = query.filter(key, value.clone());
            }
        }
        let sort = (!sort_by.is_empty()).then_some(&sort_by);
        Ok(self.inner.driver.find_one(&query, sort).await?)
    }

    /// Picks the hosting process and creates there — locally, or over IPC
    /// with health-checked fallback.
    async fn create_on_selected_process(
        &self,
        room_name: &str,
        options: &Value,
    ) -> Result<RoomListing, MatchmakerError> {
        let fleet = self.inner.stats.fetch_all().await?;
        let target = self
            .inner
            .selector
            .select(room_name, options, &fleet)
            .unwrap_or_else(|| self.inner.process_id.clone());

        if target == self.inner.process_id {
            return self.handle_create_room(room_name, options.clone()).await;
        }

        let request = ipc::request(
            &*self.inner.presence,
            &process_topic(&target),
            "create_room",
            vec![json!(room_name), options.clone()],
            ipc::LONG_TIMEOUT,
        )
        .await;

        match request {
            Ok(value) => serde_json::from_value(value)
                .map_err(|error| MatchmakerError::Matchmaking(error.to_string())),
            Err(IpcError::Timeout { .. }) if self.inner.health_checks => {
                tracing::warn!(
                    process_id = %target,
                    "remote create timed out, excluding process and retrying locally"
                );
                self.exclude_process(&target).await?;
                self.handle_create_room(room_name, options.clone()).await
            }
            Err(IpcError::Remote(message)) => Err(MatchmakerError::Matchmaking(message)),
            Err(error) => Err(error.into()),
        }
    }

    /// Creates a room on this process: factory → `on_create` → listing →
    /// IPC subscription → event binding → registry bookkeeping.
    async fn handle_create_room(
        &self,
        room_name: &str,
        options: Value,
    ) -> Result<RoomListing, MatchmakerError> {
        self.ensure_accepting()?;
        let room_id = RoomId::generate();
        let spawn = {
            let handlers = self
                .inner
                .handlers
                .read()
                .expect("handler registry lock poisoned");
            let handler = handlers
                .get(room_name)
                .ok_or_else(|| MatchmakerError::NoHandler(room_name.to_string()))?;
            (handler.factory)(RoomParams {
                room_id: room_id.clone(),
                room_name: room_name.to_string(),
                process_id: self.inner.process_id.clone(),
                create_options: merge_options(&handler.default_options, &options),
                dev_mode: self.inner.dev_mode,
            })
        };
        let spawned = spawn
            .await
            .map_err(|error| MatchmakerError::Matchmaking(error.to_string()))?;

        let snapshot = spawned.snapshot;
        let listing = RoomListing {
            room_id: room_id.clone(),
            name: room_name.to_string(),
            process_id: self.inner.process_id.clone(),
            public_address: self.inner.public_address.clone(),
            clients: 0,
            max_clients: snapshot.max_clients,
            locked: snapshot.locked,
            private: snapshot.private,
            unlisted: snapshot.unlisted,
            metadata: snapshot.metadata,
            created_at: Utc::now(),
        };
        let cache = self.inner.driver.create_instance(listing.clone()).await?;

        let ipc_task = self
            .spawn_room_inbox(room_id.clone(), spawned.handle.clone())
            .await?;
        self.spawn_room_events(room_id.clone(), cache, spawned.events);

        self.inner.rooms.insert(
            room_id.clone(),
            LocalRoom {
                handle: spawned.handle,
                ipc_task,
            },
        );
        self.inner.stats.add_rooms(1);
        Stats::schedule_flush(&self.inner.stats);

        Ok(listing)
    }

    /// Reserves a seat in a (possibly remote) room.
    async fn reserve_seat_in(
        &self,
        listing: RoomListing,
        options: Value,
        auth: Value,
    ) -> Result<SeatReservation, MatchmakerError> {
        let session_id = SessionId::generate();
        let result = self
            .room_call(
                &listing.room_id,
                "_reserveSeat",
                vec![json!(session_id.as_str()), options, auth, json!(false)],
                ipc::LONG_TIMEOUT,
            )
            .await;

        match result {
            Ok(value) if value.as_bool() == Some(true) => Ok(SeatReservation {
                room: listing,
                session_id,
            }),
            Ok(_) => Err(MatchmakerError::SeatReservation(format!(
                "room {} rejected the seat",
                listing.room_id
            ))),
            Err(error) if error.is_ipc_timeout() => Err(error),
            Err(MatchmakerError::Room(RoomError::Full(room_id))) => Err(
                MatchmakerError::SeatReservation(format!("room {room_id} is full")),
            ),
            Err(MatchmakerError::Ipc(IpcError::Remote(message))) => {
                Err(MatchmakerError::SeatReservation(message))
            }
            Err(other) => Err(other),
        }
    }

    // -----------------------------------------------------------------
    // IPC inboxes and room event binding
    // -----------------------------------------------------------------

    /// Listens on `p:<processId>` for matchmaking methods from peers.
    async fn spawn_process_inbox(&self) -> Result<JoinHandle<()>, MatchmakerError> {
        let topic = process_topic(&self.inner.process_id);
        let mut subscription = self.inner.presence.subscribe(&topic).await?;
        let matchmaker = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(bytes) = subscription.next().await {
                let request = match ipc::decode_request(&bytes) {
                    Ok(request) => request,
                    Err(error) => {
                        tracing::warn!(%error, "dropping malformed ipc frame on process inbox");
                        continue;
                    }
                };
                // Creates can suspend on user hooks; don't block the inbox.
                let matchmaker = matchmaker.clone();
                tokio::spawn(async move {
                    let result = matchmaker
                        .handle_inbox_request(request.method(), request.args())
                        .await;
                    if let Err(error) = ipc::respond(
                        &*matchmaker.inner.presence,
                        request.request_id(),
                        result,
                    )
                    .await
                    {
                        tracing::warn!(%error, "failed to publish ipc reply");
                    }
                });
            }
        }))
    }

    async fn handle_inbox_request(&self, method: &str, args: &[Value]) -> Result<Value, String> {
        match method {
            "create_room" => {
                let room_name = args
                    .first()
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| "create_room expects a room name".to_string())?;
                let options = args.get(1).cloned().unwrap_or(Value::Null);
                let listing = self
                    .handle_create_room(room_name, options)
                    .await
                    .map_err(|error| error.to_string())?;
                serde_json::to_value(listing).map_err(|error| error.to_string())
            }
            "ping" => Ok(json!("pong")),
            other => Err(format!("unknown matchmaking method {other:?}")),
        }
    }

    /// Listens on `$<roomId>` and forwards method calls into the room's
    /// whitelisted dispatcher.
    async fn spawn_room_inbox(
        &self,
        room_id: RoomId,
        handle: RoomHandle,
    ) -> Result<JoinHandle<()>, MatchmakerError> {
        let mut subscription = self.inner.presence.subscribe(&room_topic(&room_id)).await?;
        let presence = Arc::clone(&self.inner.presence);
        Ok(tokio::spawn(async move {
            while let Some(bytes) = subscription.next().await {
                let request = match ipc::decode_request(&bytes) {
                    Ok(request) => request,
                    Err(error) => {
                        tracing::warn!(%room_id, %error, "dropping malformed ipc frame on room inbox");
                        continue;
                    }
                };
                let result = handle
                    .call(request.method(), request.args().to_vec())
                    .await
                    .map_err(|error| error.to_string());
                if let Err(error) =
                    ipc::respond(&*presence, request.request_id(), result).await
                {
                    tracing::warn!(%room_id, %error, "failed to publish ipc reply");
                }
            }
        }))
    }

    /// Applies a room's lifecycle events to its listing and the stats, and
    /// finalizes bookkeeping when it disposes.
    fn spawn_room_events(
        &self,
        room_id: RoomId,
        cache: D::Cache,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
    ) {
        let matchmaker = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    RoomEvent::ClientCountChanged { clients, locked } => {
                        if let Err(error) =
                            cache.update_one(CacheUpdate::clients(clients, locked)).await
                        {
                            tracing::warn!(%room_id, %error, "listing update failed");
                        }
                    }
                    RoomEvent::LockChanged { locked } => {
                        let _ = cache.update_one(CacheUpdate::lock(locked)).await;
                    }
                    RoomEvent::VisibilityChanged { private } => {
                        let _ = cache.update_one(CacheUpdate::visibility(private)).await;
                    }
                    RoomEvent::MetadataChanged { metadata } => {
                        let _ = cache.update_one(CacheUpdate::metadata(metadata)).await;
                    }
                    RoomEvent::Joined { .. } => {
                        matchmaker.inner.stats.add_ccu(1);
                        Stats::schedule_flush(&matchmaker.inner.stats);
                    }
                    RoomEvent::Left { .. } => {
                        matchmaker.inner.stats.add_ccu(-1);
                        Stats::schedule_flush(&matchmaker.inner.stats);
                    }
                    RoomEvent::Disposing => {
                        let _ = cache.remove().await;
                    }
                    RoomEvent::Disposed => break,
                }
            }
            matchmaker.finalize_room(&room_id).await;
        });
    }

    /// Post-dispose bookkeeping: IPC unsubscribe, registry removal, stats
    /// decrement, and the `no-active-rooms` signal.
    async fn finalize_room(&self, room_id: &RoomId) {
        if let Some((_, local)) = self.inner.rooms.remove(room_id) {
            local.ipc_task.abort();
        }
        let _ = self.inner.presence.unsubscribe(&room_topic(room_id)).await;
        let remaining = self.inner.stats.add_rooms(-1);
        Stats::schedule_flush(&self.inner.stats);
        tracing::debug!(%room_id, remaining, "room deregistered");
        if remaining <= 0 {
            self.inner.no_active_rooms.notify_waiters();
        }
    }

    // -----------------------------------------------------------------
    // Graceful shutdown
    // -----------------------------------------------------------------

    /// Drains this process: exclude from the registry, lock and drain every
    /// room, await `no-active-rooms`, then shut the presence down.
    pub async fn gracefully_shutdown(&self) -> Result<(), MatchmakerError> {
        let previous = self
            .inner
            .state
            .swap(STATE_SHUTTING_DOWN, Ordering::SeqCst);
        if previous == STATE_SHUTTING_DOWN {
            return Err(MatchmakerError::ShuttingDown);
        }
        tracing::info!(process_id = %self.inner.process_id, "graceful shutdown started");

        // Step 1: disappear from the registry so nothing new lands here.
        self.inner.stats.exclude(&self.inner.process_id).await?;

        // Step 2: lock, notify and drain every local room.
        let handles: Vec<RoomHandle> = self
            .inner
            .rooms
            .iter()
            .map(|entry| entry.value().handle.clone())
            .collect();
        for handle in handles {
            if let Err(error) = handle.before_shutdown(self.inner.shutdown_close_code).await {
                tracing::warn!(room_id = %handle.room_id(), %error, "room drain failed");
            }
        }

        // Step 3: wait until the last room finished disposing. The periodic
        // re-check covers a notify racing the registration.
        loop {
            if self.inner.rooms.is_empty() {
                break;
            }
            tokio::select! {
                _ = self.inner.no_active_rooms.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        // Step 4: stop the IPC inbox, then the presence itself.
        if let Some(task) = self
            .inner
            .inbox_task
            .lock()
            .expect("inbox task lock poisoned")
            .take()
        {
            task.abort();
        }
        let _ = self
            .inner
            .presence
            .unsubscribe(&process_topic(&self.inner.process_id))
            .await;
        self.inner.presence.shutdown().await;

        tracing::info!(process_id = %self.inner.process_id, "graceful shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_options_shallow_override() {
        let defaults = json!({ "mode": "casual", "map": "plaza" });
        let options = json!({ "mode": "ranked" });
        let merged = merge_options(&defaults, &options);
        assert_eq!(merged, json!({ "mode": "ranked", "map": "plaza" }));
    }

    #[test]
    fn test_merge_options_null_sides() {
        let options = json!({ "a": 1 });
        assert_eq!(merge_options(&Value::Null, &options), options);
        assert_eq!(merge_options(&options, &Value::Null), options);
    }

    #[test]
    fn test_concurrency_key_is_canonical() {
        // serde_json maps are ordered, so key order in the source does not
        // change the rendezvous key.
        let a: Value = serde_json::from_str(r#"{ "x": 1, "y": 2 }"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "y": 2, "x": 1 }"#).unwrap();
        assert_eq!(concurrency_key(&a), concurrency_key(&b));
    }

    #[test]
    fn test_topics() {
        assert_eq!(process_topic(&ProcessId::from("p1")), "p:p1");
        assert_eq!(room_topic(&RoomId::from("r1")), "$r1");
    }
}
