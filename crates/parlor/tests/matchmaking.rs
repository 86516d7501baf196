//! Integration tests for matchmaking: join/create paths, the create-path
//! rendezvous, cross-process routing over IPC, health exclusion, stats, and
//! graceful shutdown.
//!
//! A "fleet" here is several matchmakers sharing one `LocalPresence` and
//! one `LocalDriver` — the same topology real processes get from Redis.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parlor::prelude::*;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

// =========================================================================
// Test room
// =========================================================================

struct ChatRoom {
    max_clients: u32,
    unlisted: bool,
}

impl RoomLogic for ChatRoom {
    fn options(&self) -> RoomOptions {
        RoomOptions::default()
            .with_max_clients(self.max_clients)
            .with_unlisted(self.unlisted)
            .with_patch_rate(None)
    }

    async fn on_create(&mut self, room: &mut Room<Self>, options: &Value) -> Result<(), RoomError> {
        if let Some(mode) = options.get("mode") {
            room.set_metadata(json!({ "mode": mode }));
        }
        room.on_message("ping", |_logic, room, client, _payload| {
            room.send(&client.session_id, "pong", json!("pong"));
            Ok(())
        });
        Ok(())
    }
}

fn chat_factory(options: &Value) -> ChatRoom {
    ChatRoom {
        max_clients: options
            .get("maxClients")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(u32::MAX),
        unlisted: options
            .get("unlisted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

// =========================================================================
// Helpers
// =========================================================================

type TestMatchmaker = Matchmaker<LocalPresence, LocalDriver>;

async fn fleet(size: usize) -> (Arc<LocalPresence>, Arc<LocalDriver>, Vec<TestMatchmaker>) {
    let presence = Arc::new(LocalPresence::new());
    let driver = Arc::new(LocalDriver::new());
    let mut matchmakers = Vec::with_capacity(size);
    for index in 0..size {
        let matchmaker = Matchmaker::create(
            Arc::clone(&presence),
            Arc::clone(&driver),
            MatchmakerConfig {
                process_id: Some(ProcessId::from(format!("p{index}").as_str())),
                ..MatchmakerConfig::default()
            },
        )
        .await
        .expect("matchmaker should start");
        matchmaker.define("chat", chat_factory);
        matchmakers.push(matchmaker);
    }
    (presence, driver, matchmakers)
}

/// Lets room actors and event-binding tasks process everything queued.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn connect(
    matchmaker: &TestMatchmaker,
    seat: &SeatReservation,
) -> UnboundedReceiver<Outbound> {
    let (transport, rx) = ClientRef::channel();
    matchmaker
        .join_room(&seat.room.room_id, seat.session_id.clone(), transport)
        .await
        .expect("connect should succeed");
    rx
}

async fn listing_of(driver: &LocalDriver, room_id: &RoomId) -> RoomListing {
    driver
        .find_one(&Query::by_room_id(room_id.clone()).with_unlisted(), None)
        .await
        .unwrap()
        .expect("listing should exist")
}

// =========================================================================
// join / create basics
// =========================================================================

#[tokio::test]
async fn test_join_or_create_twice_lands_in_same_room() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let first = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    let second = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();

    assert_eq!(first.room.room_id, second.room.room_id);
    assert_ne!(first.session_id, second.session_id);

    settle().await;
    let listing = listing_of(&driver, &first.room.room_id).await;
    assert_eq!(listing.clients, 2, "both reserved seats are counted");
}

#[tokio::test]
async fn test_full_locked_room_rejects_further_seats() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let options = json!({ "maxClients": 2 });
    let first = mm
        .join_or_create("chat", options.clone(), Value::Null)
        .await
        .unwrap();
    let second = mm
        .join_or_create("chat", options.clone(), Value::Null)
        .await
        .unwrap();
    assert_eq!(first.room.room_id, second.room.room_id);

    settle().await;
    let listing = listing_of(&driver, &first.room.room_id).await;
    assert_eq!(listing.clients, 2);
    assert!(listing.locked, "room auto-locks at capacity");

    // A third seat in that specific room is refused.
    let third = mm
        .join_by_id(&first.room.room_id, json!({}), Value::Null)
        .await;
    assert!(matches!(third, Err(MatchmakerError::SeatReservation(_))));
}

#[tokio::test]
async fn test_join_never_creates() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let result = matchmakers[0].join("chat", json!({}), Value::Null).await;
    assert!(matches!(result, Err(MatchmakerError::RoomNotFound(_))));
}

#[tokio::test]
async fn test_unknown_room_name_is_rejected() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let result = matchmakers[0]
        .join_or_create("nope", json!({}), Value::Null)
        .await;
    assert!(matches!(result, Err(MatchmakerError::NoHandler(name)) if name == "nope"));
}

#[tokio::test]
async fn test_join_by_unknown_id_is_rejected() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let result = matchmakers[0]
        .join_by_id(&RoomId::from("missing"), json!({}), Value::Null)
        .await;
    assert!(matches!(result, Err(MatchmakerError::InvalidRoomId(_))));
}

#[tokio::test]
async fn test_create_always_makes_a_new_room() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let first = mm.create("chat", json!({}), Value::Null).await.unwrap();
    let second = mm.create("chat", json!({}), Value::Null).await.unwrap();

    assert_ne!(first.room.room_id, second.room.room_id);
    let all = driver.query(&Query::any(), None).await.unwrap();
    assert_eq!(all.len(), 2);
}

// =========================================================================
// Connect flow
// =========================================================================

#[tokio::test]
async fn test_connect_and_message_round_trip() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let seat = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    let mut rx = connect(mm, &seat).await;

    // JOIN_ROOM arrives first.
    let first = match rx.try_recv().unwrap() {
        Outbound::Frame(bytes) => Frame::decode(&bytes).unwrap(),
        other => panic!("expected a frame, got {other:?}"),
    };
    assert!(matches!(first, Frame::JoinRoom { .. }));

    // And the room answers typed messages.
    let handle = mm.room_handle(&seat.room.room_id).unwrap();
    let ping = Frame::RoomData {
        message_type: "ping".into(),
        payload: None,
    };
    handle
        .send_message(seat.session_id.clone(), ping.encode().unwrap())
        .await
        .unwrap();
    settle().await;

    let mut saw_pong = false;
    while let Ok(Outbound::Frame(bytes)) = rx.try_recv() {
        if let Ok(Frame::RoomData { message_type, .. }) = Frame::decode(&bytes) {
            if message_type == MessageType::from("pong") {
                saw_pong = true;
            }
        }
    }
    assert!(saw_pong);
}

#[tokio::test(start_paused = true)]
async fn test_expired_seat_cannot_connect() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    // One connected client keeps the room alive past the reaping below.
    let keepalive = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    let _keepalive_rx = connect(mm, &keepalive).await;

    let seat = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    assert_eq!(seat.room.room_id, keepalive.room.room_id);

    // The default seat TTL elapses before the transport arrives.
    tokio::time::sleep(Duration::from_secs(16)).await;

    let (transport, _rx) = ClientRef::channel();
    let result = mm
        .join_room(&seat.room.room_id, seat.session_id.clone(), transport)
        .await;
    assert!(matches!(result, Err(MatchmakerError::Expired)));
}

// =========================================================================
// Seat timeout (S2)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_unclaimed_reservation_is_reaped() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let seat = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    settle().await;
    assert_eq!(listing_of(&driver, &seat.room.room_id).await.clients, 1);

    // Client never connects: after seat_reservation_time the listing count
    // returns to zero (and the empty room disposes shortly after).
    tokio::time::sleep(Duration::from_secs(16)).await;
    settle().await;

    let remaining = driver.query(&Query::any(), None).await.unwrap();
    assert!(
        remaining.is_empty(),
        "empty room should dispose after its only seat expired"
    );
    assert_eq!(mm.local_room_count(), 0);
}

// =========================================================================
// Create-path rendezvous (invariant 9)
// =========================================================================

#[tokio::test]
async fn test_concurrent_join_or_create_creates_exactly_one_room() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let callers = (0..5).map(|_| {
        let mm = mm.clone();
        async move {
            mm.join_or_create("chat", json!({ "mode": "arena" }), Value::Null)
                .await
        }
    });
    let seats: Vec<SeatReservation> = join_all(callers)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("every caller should get a seat");

    let room_id = &seats[0].room.room_id;
    assert!(
        seats.iter().all(|seat| seat.room.room_id == *room_id),
        "all callers must land in the winner's room"
    );

    settle().await;
    let all = driver.query(&Query::any(), None).await.unwrap();
    assert_eq!(all.len(), 1, "exactly one room must be created");
    assert_eq!(all[0].clients, 5);
}

// =========================================================================
// Cross-process routing (S4)
// =========================================================================

/// Pins room creation to one process, making cross-process tests
/// deterministic.
struct PinTo(ProcessId);

impl ProcessSelector for PinTo {
    fn select(
        &self,
        _room_name: &str,
        _options: &Value,
        _processes: &[ProcessStats],
    ) -> Option<ProcessId> {
        Some(self.0.clone())
    }
}

async fn pinned_fleet() -> (Arc<LocalDriver>, TestMatchmaker, TestMatchmaker) {
    let presence = Arc::new(LocalPresence::new());
    let driver = Arc::new(LocalDriver::new());
    let owner = Matchmaker::create(
        Arc::clone(&presence),
        Arc::clone(&driver),
        MatchmakerConfig {
            process_id: Some(ProcessId::from("owner")),
            selector: Box::new(PinTo(ProcessId::from("owner"))),
            ..MatchmakerConfig::default()
        },
    )
    .await
    .unwrap();
    let peer = Matchmaker::create(
        Arc::clone(&presence),
        Arc::clone(&driver),
        MatchmakerConfig {
            process_id: Some(ProcessId::from("peer")),
            selector: Box::new(PinTo(ProcessId::from("owner"))),
            ..MatchmakerConfig::default()
        },
    )
    .await
    .unwrap();
    owner.define("chat", chat_factory);
    peer.define("chat", chat_factory);
    (driver, owner, peer)
}

#[tokio::test]
async fn test_join_by_id_routes_to_remote_owner() {
    let (_driver, owner, peer) = pinned_fleet().await;

    let created = owner.create("chat", json!({}), Value::Null).await.unwrap();
    assert_eq!(created.room.process_id, ProcessId::from("owner"));

    // The peer has no local copy of the room: the reserve goes over IPC.
    assert!(peer.room_handle(&created.room.room_id).is_none());
    let seat = peer
        .join_by_id(&created.room.room_id, json!({}), Value::Null)
        .await
        .unwrap();
    assert_eq!(seat.room.room_id, created.room.room_id);

    // The client then connects to the owning process.
    let _rx = connect(&owner, &seat).await;
    settle().await;
    assert_eq!(owner.local_ccu(), 1);
    assert_eq!(peer.local_ccu(), 0);
}

#[tokio::test]
async fn test_remote_create_is_hosted_by_selected_process() {
    let (_driver, owner, peer) = pinned_fleet().await;

    // The peer asks for a room; the selector pins it to the owner, so the
    // create travels over the owner's process inbox.
    let seat = peer
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();

    assert_eq!(seat.room.process_id, ProcessId::from("owner"));
    assert_eq!(owner.local_room_count(), 1);
    assert_eq!(peer.local_room_count(), 0);
}

#[tokio::test]
async fn test_remote_room_call_locks_remote_room() {
    let (driver, owner, peer) = pinned_fleet().await;
    let created = owner.create("chat", json!({}), Value::Null).await.unwrap();

    peer.remote_room_call(&created.room.room_id, "lock", vec![])
        .await
        .unwrap();
    settle().await;

    let listing = listing_of(&driver, &created.room.room_id).await;
    assert!(listing.locked);
}

// =========================================================================
// Health-checked create fallback (S5)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_dead_process_is_excluded_and_create_retries_locally() {
    let (presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    // Give the local process one room so the default selector prefers the
    // (cheaper-looking) dead process for the next create.
    let _existing = mm.create("chat", json!({}), Value::Null).await.unwrap();
    presence.hset("roomcount", "deadpid", "0,0").await.unwrap();

    let seat = mm.create("chat", json!({}), Value::Null).await.unwrap();

    // The create fell back to the local process...
    assert_eq!(seat.room.process_id, *mm.process_id());
    assert_eq!(mm.local_room_count(), 2);

    // ...and the dead process is gone from the registry.
    let fleet_view = mm.process_stats().await.unwrap();
    assert!(fleet_view
        .iter()
        .all(|stats| stats.process_id != ProcessId::from("deadpid")));
    assert!(presence.hget("roomcount", "deadpid").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_health_check_reports_live_and_dead_processes() {
    let (_presence, _driver, matchmakers) = fleet(2).await;

    assert!(matchmakers[0].health_check(matchmakers[1].process_id()).await);
    assert!(!matchmakers[0].health_check(&ProcessId::from("deadpid")).await);
}

// =========================================================================
// Listings, filters, stats
// =========================================================================

#[tokio::test]
async fn test_filter_by_matches_metadata() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];
    mm.define_with(
        "filtered",
        chat_factory,
        DefineOptions {
            filter_by: vec!["mode".into()],
            ..DefineOptions::default()
        },
    );

    let ranked = mm
        .create("filtered", json!({ "mode": "ranked" }), Value::Null)
        .await
        .unwrap();
    let casual = mm
        .create("filtered", json!({ "mode": "casual" }), Value::Null)
        .await
        .unwrap();
    settle().await;

    let seat = mm
        .join_or_create("filtered", json!({ "mode": "casual" }), Value::Null)
        .await
        .unwrap();
    assert_eq!(seat.room.room_id, casual.room.room_id);
    assert_ne!(seat.room.room_id, ranked.room.room_id);
}

#[tokio::test]
async fn test_unlisted_room_is_hidden_from_join() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let unlisted = mm
        .create("chat", json!({ "unlisted": true }), Value::Null)
        .await
        .unwrap();
    settle().await;

    // Plain join does not see it...
    let result = mm.join("chat", json!({}), Value::Null).await;
    assert!(matches!(result, Err(MatchmakerError::RoomNotFound(_))));

    // ...but joining by id still works.
    let seat = mm
        .join_by_id(&unlisted.room.room_id, json!({}), Value::Null)
        .await
        .unwrap();
    assert_eq!(seat.room.room_id, unlisted.room.room_id);
}

#[tokio::test]
async fn test_ccu_tracks_joins_and_leaves() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let seat_a = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    let seat_b = mm
        .join_or_create("chat", json!({}), Value::Null)
        .await
        .unwrap();
    let _rx_a = connect(mm, &seat_a).await;
    let _rx_b = connect(mm, &seat_b).await;
    settle().await;
    assert_eq!(mm.local_ccu(), 2);

    let handle = mm.room_handle(&seat_a.room.room_id).unwrap();
    handle
        .transport_closed(seat_a.session_id.clone(), close::CONSENTED)
        .await
        .unwrap();
    settle().await;
    assert_eq!(mm.local_ccu(), 1);
}

#[tokio::test]
async fn test_dispose_room_removes_listing_and_registry() {
    let (_presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let seat = mm.create("chat", json!({}), Value::Null).await.unwrap();
    settle().await;

    mm.dispose_room(&seat.room.room_id).await.unwrap();
    settle().await;

    assert_eq!(mm.local_room_count(), 0);
    assert!(driver.query(&Query::any(), None).await.unwrap().is_empty());
}

// =========================================================================
// Graceful shutdown (S6)
// =========================================================================

#[tokio::test]
async fn test_graceful_shutdown_drains_everything_in_order() {
    let (presence, driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    let seat_a = mm.create("chat", json!({}), Value::Null).await.unwrap();
    let seat_b = mm.create("chat", json!({}), Value::Null).await.unwrap();
    let mut rx_a = connect(mm, &seat_a).await;
    let mut rx_b = connect(mm, &seat_b).await;
    settle().await;
    assert_eq!(mm.local_room_count(), 2);

    mm.gracefully_shutdown().await.unwrap();

    // The process registry entry went away.
    assert!(presence.hget("roomcount", "p0").await.unwrap().is_none());

    // Every client was disconnected with the configured close code.
    for rx in [&mut rx_a, &mut rx_b] {
        let mut closed = false;
        while let Ok(item) = rx.try_recv() {
            if matches!(item, Outbound::Close(code) if code == close::CONSENTED) {
                closed = true;
            }
        }
        assert!(closed, "client must be closed during drain");
    }

    // All rooms and listings are gone, and new matchmaking is refused.
    assert_eq!(mm.local_room_count(), 0);
    assert!(driver.query(&Query::any(), None).await.unwrap().is_empty());
    let refused = mm.join_or_create("chat", json!({}), Value::Null).await;
    assert!(matches!(refused, Err(MatchmakerError::ShuttingDown)));
}

#[tokio::test]
async fn test_graceful_shutdown_twice_is_rejected() {
    let (_presence, _driver, matchmakers) = fleet(1).await;
    let mm = &matchmakers[0];

    mm.gracefully_shutdown().await.unwrap();
    let second = mm.gracefully_shutdown().await;
    assert!(matches!(second, Err(MatchmakerError::ShuttingDown)));
}
