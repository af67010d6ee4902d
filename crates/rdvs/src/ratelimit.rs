use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limit on inbound messages for one connection.
///
/// Individual arrival times are kept, so a burst straddling a minute
/// boundary is still counted against a single window.
#[derive(Debug, Default)]
pub struct RateLimiter {
    window: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.window.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a message at `now` unless `per_minute` messages already
    /// arrived within the window. Returns `false` when the message must be
    /// dropped; dropped messages are not recorded.
    pub fn allow(&mut self, per_minute: u32, now: Instant) -> bool {
        self.expire(now);
        if self.window.len() >= per_minute as usize {
            return false;
        }
        self.window.push_back(now);
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.window.len()
    }
}
