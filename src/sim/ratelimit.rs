//! Spacing between planner calls.
//!
//! Tracks the last call and a rolling count per window. Once the count
//! reaches the cap, the next admission asks for a break.

use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Answer to "may I call the planner now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// How long to wait before calling
    pub wait: Duration,
    /// The window's call budget is spent
    pub needs_break: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    delay: Duration,
    floor: Duration,
    max_calls: u32,
    window: Duration,
    break_for: Duration,
    last_call: Option<Instant>,
    calls_in_window: u32,
    window_start: Option<Instant>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let floor = Duration::from_millis(config.floor_ms);
        Self {
            delay: Duration::from_millis(config.delay_ms).max(floor),
            floor,
            max_calls: config.max_calls.max(1),
            window: Duration::from_secs(config.window_secs),
            break_for: Duration::from_secs(config.break_secs),
            last_call: None,
            calls_in_window: 0,
            window_start: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn break_duration(&self) -> Duration {
        self.break_for
    }

    #[cfg(test)]
    pub fn calls_in_window(&self) -> u32 {
        self.calls_in_window
    }

    /// Drop the count if the current window has run out
    fn roll_window(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) >= self.window {
                self.calls_in_window = 0;
                self.window_start = None;
            }
        }
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        self.roll_window(now);

        let wait = match self.last_call {
            Some(last) => self.delay.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };

        Admission {
            wait,
            needs_break: self.calls_in_window >= self.max_calls,
        }
    }

    pub fn record_call(&mut self, now: Instant) {
        self.roll_window(now);
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.last_call = Some(now);
        self.calls_in_window += 1;
    }

    /// Break is over: fresh window, fresh budget
    pub fn finish_break(&mut self, now: Instant) {
        self.calls_in_window = 0;
        self.window_start = Some(now);
    }

    /// Shorten the gap after a successful call, never below the floor
    pub fn relax(&mut self) {
        self.delay = (self.delay * 9 / 10).max(self.floor);
    }
}
