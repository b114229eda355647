//! Tick Scheduler
//!
//! Fixed-interval rate limiter. The loop body runs at most once per
//! interval; a slow frame pushes the next one back instead of being
//! caught up.

use std::thread;
use std::time::{Duration, Instant};

/// Paces a loop to a fixed frame interval.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: Duration,
    frame_start: Instant,
    frames: u64,
}

impl TickScheduler {
    /// Scheduler with an explicit frame interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frame_start: Instant::now(),
            frames: 0,
        }
    }

    /// Scheduler running at `frames_per_second`.
    pub fn from_frame_rate(frames_per_second: u32) -> Self {
        Self::new(Duration::from_secs(1) / frames_per_second.max(1))
    }

    /// Frame interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frame rate, rounded to the nearest whole frame.
    pub fn frame_rate(&self) -> u32 {
        if self.interval.is_zero() {
            return u32::MAX;
        }
        (1.0 / self.interval.as_secs_f64()).round() as u32
    }

    /// Frames completed so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Time left in the current frame.
    pub fn remaining(&self) -> Duration {
        (self.frame_start + self.interval).saturating_duration_since(Instant::now())
    }

    /// Block until the current frame's interval has elapsed, then start the
    /// next frame.
    pub fn wait(&mut self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        self.frame_start = Instant::now();
        self.frames += 1;
    }
}
