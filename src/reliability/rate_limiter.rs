//! Sliding-window event rate limiter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, retry after {retry_after_ms}ms")]
pub struct RateLimitExceeded {
    pub retry_after_ms: u64,
}

/// Admits at most `max_events` within any `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max_events: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_events: config.max_events.max(1) as usize,
            window: Duration::from_millis(config.window_ms.max(1)),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit one event or report when the next slot frees up.
    pub fn check(&self) -> Result<(), RateLimitExceeded> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Result<(), RateLimitExceeded> {
        let mut admitted = self.admitted.lock();
        while admitted
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            admitted.pop_front();
        }

        if admitted.len() < self.max_events {
            admitted.push_back(now);
            return Ok(());
        }

        let retry_after = admitted
            .front()
            .map_or(self.window, |oldest| self.window.saturating_sub(now.duration_since(*oldest)));
        Err(RateLimitExceeded {
            retry_after_ms: retry_after.as_millis().max(1) as u64,
        })
    }

    /// Events admitted in the current window.
    pub fn in_window(&self) -> usize {
        self.admitted.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_events: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            max_events,
            window_ms,
        })
    }

    #[test]
    fn test_rejects_over_limit() {
        let limiter = limiter(2, 60_000);
        let now = Instant::now();
        assert!(limiter.check_at(now).is_ok());
        assert!(limiter.check_at(now).is_ok());
        let err = limiter.check_at(now).unwrap_err();
        assert!(err.retry_after_ms > 0);
        assert!(err.retry_after_ms <= 60_000);
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(1, 100);
        let start = Instant::now();
        assert!(limiter.check_at(start).is_ok());
        assert!(limiter.check_at(start + Duration::from_millis(50)).is_err());
        assert!(limiter.check_at(start + Duration::from_millis(100)).is_ok());
        assert_eq!(limiter.in_window(), 1);
    }
}
