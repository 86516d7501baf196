//! Monotonic tick clock for parlor rooms.
//!
//! One [`Clock`] per room, driven by the room's simulation (or patch) loop:
//! each [`tick`](Clock::tick) advances `delta_time`/`elapsed_time` and
//! reports which user timers came due. Timers are driven by ticks, not
//! wall-clock tasks — pausing the tick loop pauses every timer with it.
//!
//! The clock reads `tokio::time::Instant`, so tests under
//! `#[tokio::test(start_paused = true)]` control it deterministically.
//!
//! # Integration
//!
//! The room actor owns the callback for each [`TimerId`]; the clock owns
//! scheduling only. A tick looks like:
//!
//! ```ignore
//! for timer_id in room.clock.tick() {
//!     room.fire_timer(timer_id); // looks up and runs the callback
//! }
//! simulation(clock.delta_time());
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// A tick-to-tick gap larger than this is treated as a suspension
/// (debugger, laptop sleep, stalled executor), not simulation time.
pub const JUMP_THRESHOLD: Duration = Duration::from_secs(1);

/// What `delta_time` is clamped to when a jump is detected, so simulations
/// never integrate a huge step.
pub const DELTA_CLAMP: Duration = Duration::from_millis(100);

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    id: TimerId,
    /// Fires when `elapsed_time` reaches this.
    deadline: Duration,
    /// `Some` re-arms after each fire; `None` is a one-shot.
    interval: Option<Duration>,
}

/// Monotonic time source plus tick-driven timer queue.
pub struct Clock {
    running: bool,
    last_tick: Option<Instant>,
    delta_time: Duration,
    elapsed_time: Duration,
    timers: Vec<TimerEntry>,
    next_timer_id: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Creates a stopped clock at elapsed time zero.
    pub fn new() -> Self {
        Self {
            running: false,
            last_tick: None,
            delta_time: Duration::ZERO,
            elapsed_time: Duration::ZERO,
            timers: Vec::new(),
            next_timer_id: 1,
        }
    }

    /// Starts (or restarts) the clock from now.
    pub fn start(&mut self) {
        self.running = true;
        self.last_tick = Some(Instant::now());
    }

    /// Stops the clock; ticks become no-ops until [`start`](Self::start).
    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick = None;
    }

    /// Resets accumulated time without touching timers.
    pub fn reset(&mut self) {
        self.delta_time = Duration::ZERO;
        self.elapsed_time = Duration::ZERO;
        if self.running {
            self.last_tick = Some(Instant::now());
        }
    }

    /// Removes every timer.
    pub fn clear(&mut self) {
        self.timers.clear();
    }

    /// Advances the clock and returns the timers that came due (firing
    /// order is unspecified).
    ///
    /// `delta_time` is `now − previous tick`; a gap above
    /// [`JUMP_THRESHOLD`] is clamped to [`DELTA_CLAMP`].
    pub fn tick(&mut self) -> Vec<TimerId> {
        if !self.running {
            return Vec::new();
        }
        let now = Instant::now();
        let mut delta = match self.last_tick {
            Some(previous) => now.saturating_duration_since(previous),
            None => Duration::ZERO,
        };
        if delta > JUMP_THRESHOLD {
            tracing::debug!(
                gap_ms = delta.as_millis() as u64,
                "clock jump detected, clamping delta"
            );
            delta = DELTA_CLAMP;
        }
        self.last_tick = Some(now);
        self.delta_time = delta;
        self.elapsed_time += delta;

        self.collect_due()
    }

    /// Reverse-indexed sweep so one-shot entries can be removed in place.
    fn collect_due(&mut self) -> Vec<TimerId> {
        let mut due = Vec::new();
        for index in (0..self.timers.len()).rev() {
            if self.timers[index].deadline <= self.elapsed_time {
                due.push(self.timers[index].id);
                match self.timers[index].interval {
                    Some(interval) => {
                        // Re-arm relative to now — no catch-up bursts.
                        self.timers[index].deadline = self.elapsed_time + interval;
                    }
                    None => {
                        self.timers.swap_remove(index);
                    }
                }
            }
        }
        due
    }

    /// Schedules a one-shot timer `delay` of tick-time from now.
    pub fn set_timeout(&mut self, delay: Duration) -> TimerId {
        self.schedule(delay, None)
    }

    /// Schedules a repeating timer firing every `delay` of tick-time.
    pub fn set_interval(&mut self, delay: Duration) -> TimerId {
        self.schedule(delay, Some(delay))
    }

    fn schedule(&mut self, delay: Duration, interval: Option<Duration>) -> TimerId {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        self.timers.push(TimerEntry {
            id,
            deadline: self.elapsed_time + delay,
            interval,
        });
        id
    }

    /// Cancels a one-shot timer. Returns whether it was still scheduled.
    pub fn clear_timeout(&mut self, id: TimerId) -> bool {
        self.remove_timer(id)
    }

    /// Cancels a repeating timer. Returns whether it was still scheduled.
    pub fn clear_interval(&mut self, id: TimerId) -> bool {
        self.remove_timer(id)
    }

    fn remove_timer(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.id != id);
        self.timers.len() != before
    }

    /// Whether a timer is still scheduled.
    pub fn has_timer(&self, id: TimerId) -> bool {
        self.timers.iter().any(|timer| timer.id == id)
    }

    /// Time advanced by the most recent tick.
    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// Total tick-time accumulated since creation/reset.
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of scheduled timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}
