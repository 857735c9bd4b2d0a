//! Exponential reconnect delay for the frame source.

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(5);

/// Doubles on every failure, capped, reset after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: INITIAL,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(CAP);
        self.failures += 1;
        delay
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
