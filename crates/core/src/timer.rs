//! Frame timer.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring frame and section durations.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total time since the timer was created or last reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the timer was created or last reset, in milliseconds.
    pub fn elapsed_ms(&self) -> f32 {
        self.elapsed().as_secs_f32() * 1000.0
    }

    /// Time since the previous `tick()`; advances the tick marker.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Delta time in seconds since the previous tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
