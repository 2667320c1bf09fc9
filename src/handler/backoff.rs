use std::time::{Duration, Instant};

/// Tracks reconnect backoff timing and schedules the next retry window.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    next_retry_at: Instant,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
            next_retry_at: Instant::now(),
        }
    }

    /// Record a failure and push the next retry into the future.
    pub fn mark_failure(&mut self, now: Instant) {
        self.next_retry_at = now + self.current;
        self.current = (self.current * 2).min(self.max);
    }

    pub fn mark_success(&mut self, now: Instant) {
        self.current = self.initial;
        self.next_retry_at = now;
    }

    pub fn should_retry(&self, now: Instant) -> bool {
        now >= self.next_retry_at
    }
}
