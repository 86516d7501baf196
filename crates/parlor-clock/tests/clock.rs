//! Integration tests for the tick clock.
//!
//! All timing-sensitive tests run with `start_paused = true` so
//! `tokio::time::advance` controls the clock deterministically.

use std::time::Duration;

use parlor_clock::{Clock, DELTA_CLAMP};

// =========================================================================
// Start / stop / tick
// =========================================================================

#[test]
fn test_new_clock_is_stopped_at_zero() {
    let clock = Clock::new();
    assert!(!clock.is_running());
    assert_eq!(clock.elapsed_time(), Duration::ZERO);
    assert_eq!(clock.delta_time(), Duration::ZERO);
    assert_eq!(clock.timer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_while_stopped_is_noop() {
    let mut clock = Clock::new();
    tokio::time::advance(Duration::from_millis(100)).await;

    assert!(clock.tick().is_empty());
    assert_eq!(clock.elapsed_time(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_tick_accumulates_elapsed_time() {
    let mut clock = Clock::new();
    clock.start();

    tokio::time::advance(Duration::from_millis(50)).await;
    clock.tick();
    assert_eq!(clock.delta_time(), Duration::from_millis(50));
    assert_eq!(clock.elapsed_time(), Duration::from_millis(50));

    tokio::time::advance(Duration::from_millis(30)).await;
    clock.tick();
    assert_eq!(clock.delta_time(), Duration::from_millis(30));
    assert_eq!(clock.elapsed_time(), Duration::from_millis(80));
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_is_monotone() {
    let mut clock = Clock::new();
    clock.start();

    let mut previous = Duration::ZERO;
    for _ in 0..10 {
        tokio::time::advance(Duration::from_millis(7)).await;
        clock.tick();
        assert!(clock.elapsed_time() >= previous);
        previous = clock.elapsed_time();
    }
}

#[tokio::test(start_paused = true)]
async fn test_large_jump_clamps_delta() {
    let mut clock = Clock::new();
    clock.start();

    // A 5-second stall must not feed 5 seconds into the simulation.
    tokio::time::advance(Duration::from_secs(5)).await;
    clock.tick();

    assert_eq!(clock.delta_time(), DELTA_CLAMP);
    assert_eq!(clock.elapsed_time(), DELTA_CLAMP);
}

#[tokio::test(start_paused = true)]
async fn test_sub_threshold_delta_is_not_clamped() {
    let mut clock = Clock::new();
    clock.start();

    // 800 ms is below the jump threshold — passes through unclamped.
    tokio::time::advance(Duration::from_millis(800)).await;
    clock.tick();

    assert_eq!(clock.delta_time(), Duration::from_millis(800));
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_restart_skips_stopped_period() {
    let mut clock = Clock::new();
    clock.start();
    tokio::time::advance(Duration::from_millis(20)).await;
    clock.tick();

    clock.stop();
    tokio::time::advance(Duration::from_secs(10)).await;
    clock.start();

    tokio::time::advance(Duration::from_millis(10)).await;
    clock.tick();

    // Only the 20 ms + 10 ms of running time count.
    assert_eq!(clock.elapsed_time(), Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_reset_zeroes_time_but_keeps_timers() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_timeout(Duration::from_millis(100));
    tokio::time::advance(Duration::from_millis(50)).await;
    clock.tick();

    clock.reset();

    assert_eq!(clock.elapsed_time(), Duration::ZERO);
    assert!(clock.has_timer(id));
}

// =========================================================================
// Timers
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_set_timeout_fires_once_after_delay() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_timeout(Duration::from_millis(100));

    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(clock.tick().is_empty());

    tokio::time::advance(Duration::from_millis(60)).await;
    assert_eq!(clock.tick(), vec![id]);
    assert!(!clock.has_timer(id));

    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(clock.tick().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_fires_repeatedly() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_interval(Duration::from_millis(50));

    let mut fires = 0;
    for _ in 0..4 {
        tokio::time::advance(Duration::from_millis(50)).await;
        fires += clock.tick().iter().filter(|t| **t == id).count();
    }

    assert_eq!(fires, 4);
    assert!(clock.has_timer(id));
}

#[tokio::test(start_paused = true)]
async fn test_interval_rearms_without_catchup_burst() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_interval(Duration::from_millis(10));

    // One long gap (clamped to 100 ms of tick-time) must produce exactly
    // one fire, not ten.
    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(clock.tick(), vec![id]);

    // The next fire is a full interval away.
    tokio::time::advance(Duration::from_millis(5)).await;
    assert!(clock.tick().is_empty());
    tokio::time::advance(Duration::from_millis(5)).await;
    assert_eq!(clock.tick(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_timeout_cancels_pending_timer() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_timeout(Duration::from_millis(10));

    assert!(clock.clear_timeout(id));
    assert!(!clock.clear_timeout(id), "second clear reports not-found");

    tokio::time::advance(Duration::from_millis(20)).await;
    assert!(clock.tick().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clear_interval_stops_future_fires() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_interval(Duration::from_millis(10));

    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(clock.tick(), vec![id]);

    assert!(clock.clear_interval(id));
    tokio::time::advance(Duration::from_millis(50)).await;
    assert!(clock.tick().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_multiple_due_timers_all_fire() {
    let mut clock = Clock::new();
    clock.start();
    let a = clock.set_timeout(Duration::from_millis(10));
    let b = clock.set_timeout(Duration::from_millis(20));
    let c = clock.set_interval(Duration::from_millis(15));

    tokio::time::advance(Duration::from_millis(25)).await;
    let mut due = clock.tick();
    due.sort_by_key(|id| format!("{id:?}"));

    assert_eq!(due.len(), 3);
    assert!(due.contains(&a) && due.contains(&b) && due.contains(&c));
    assert_eq!(clock.timer_count(), 1, "only the interval survives");
}

#[tokio::test(start_paused = true)]
async fn test_timers_pause_with_the_tick_loop() {
    let mut clock = Clock::new();
    clock.start();
    let id = clock.set_timeout(Duration::from_millis(10));

    // Wall time passes but nobody ticks: the timer must not fire early
    // when ticking resumes after a small gap.
    tokio::time::advance(Duration::from_millis(5)).await;
    clock.tick();
    tokio::time::advance(Duration::from_millis(4)).await;
    assert!(clock.tick().is_empty());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(clock.tick(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_removes_all_timers() {
    let mut clock = Clock::new();
    clock.start();
    clock.set_timeout(Duration::from_millis(10));
    clock.set_interval(Duration::from_millis(10));

    clock.clear();

    assert_eq!(clock.timer_count(), 0);
    tokio::time::advance(Duration::from_millis(20)).await;
    assert!(clock.tick().is_empty());
}
