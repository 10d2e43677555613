//! Frame pacing and refresh policy.

use std::time::{Duration, Instant};

/// Frame rate used when the configured rate is not positive.
pub const DEFAULT_FRAME_RATE: f32 = 30.0;

const MAX_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_FRAME_INTERVAL_SECS: f64 = 3600.0;

/// Target time between deliveries for a frame rate.
pub fn frame_interval(frame_rate: f32) -> Duration {
    let fps = if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        DEFAULT_FRAME_RATE
    };
    Duration::from_secs_f64((1.0 / fps as f64).min(MAX_FRAME_INTERVAL_SECS))
}

/// Bounded wait for a new desktop frame. Never longer than one interval, so a
/// static screen still refreshes on the tick grid; capped at 500 ms so stop
/// and source loss are noticed at slow rates.
pub fn acquire_timeout(interval: Duration) -> Duration {
    interval.min(MAX_ACQUIRE_TIMEOUT)
}

/// A timed-out acquisition still delivers the last staged frame once the
/// screen has been static for more than two intervals.
pub fn should_force_refresh(since_last_success: Duration, interval: Duration) -> bool {
    since_last_success > interval * 2
}

/// Schedules ticks on a fixed grid, re-anchoring when the loop falls behind.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    next_tick: Instant,
}

impl FramePacer {
    /// The first tick fires at `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_tick: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns how long to wait before the next tick and advances the grid.
    pub fn schedule(&mut self, now: Instant) -> Duration {
        let mut tick = self.next_tick;
        let wait = if tick > now {
            tick - now
        } else {
            if now - tick >= self.interval {
                tick = now;
            }
            Duration::ZERO
        };
        self.next_tick = tick + self.interval;
        wait
    }
}
