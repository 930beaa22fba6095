//! Exponential reconnect backoff.

use std::time::Duration;

/// Base delay before the first reconnect attempt.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Growth factor per failed attempt.
const FACTOR: f64 = 1.5;

/// Delay ceiling.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff: `1s × 1.5^attempt`, capped at 30s.
///
/// The attempt counter survives individual failures and resets only when a
/// connection is fully established, so a flapping link keeps climbing
/// toward the cap instead of hammering the server.
#[derive(Clone, Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Fresh backoff with no failed attempts.
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// The delay for a given attempt number.
    pub fn delay_for(attempt: u32) -> Duration {
        let secs = BASE_DELAY.as_secs_f64() * FACTOR.powi(attempt.min(64) as i32);
        if secs >= MAX_DELAY.as_secs_f64() {
            MAX_DELAY
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay to wait before the next attempt, then advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
