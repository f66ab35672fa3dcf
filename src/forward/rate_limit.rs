//! Sliding-window limit on forwarded messages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The window is full; the oldest send ages out after `retry_after`.
    #[error("rate limit exceeded; retry after {}ms", retry_after.as_millis())]
    Exceeded { retry_after: Duration },
}

/// Counts sends within a trailing window (one minute by default).
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages: u32,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    /// Limit to `max_messages_per_minute`. Zero disables the limit.
    #[must_use]
    pub fn new(max_messages_per_minute: u32) -> Self {
        Self::with_window(max_messages_per_minute, Duration::from_secs(60))
    }

    /// Limiter allowing `max_messages` per sliding `window`; 0 is unlimited.
    #[must_use]
    pub fn with_window(max_messages: u32, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            sent: VecDeque::new(),
        }
    }

    /// Record a send if the window has room.
    pub fn try_send(&mut self) -> Result<(), RateLimitError> {
        if self.max_messages == 0 {
            return Ok(());
        }
        let now = Instant::now();
        self.expire(now);

        if self.sent.len() >= self.max_messages as usize
            && let Some(&oldest) = self.sent.front()
        {
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError::Exceeded { retry_after });
        }

        self.sent.push_back(now);
        Ok(())
    }

    /// Sends left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        if self.max_messages == 0 {
            return u32::MAX;
        }
        self.max_messages
            .saturating_sub(u32::try_from(self.sent.len()).unwrap_or(u32::MAX))
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&first) = self.sent.front() {
            if now.duration_since(first) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
