//! Fixed-window rate limiter middleware.
//!
//! Counts requests per wall-clock minute with two atomics; the counter
//! resets when a new minute starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

/// Shared state for the rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    /// Maximum requests allowed per minute. 0 disables limiting.
    max_per_minute: u64,
    /// Requests seen in the active window.
    count: Arc<AtomicU64>,
    /// Epoch minute of the active window.
    window: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u64) -> Self {
        Self {
            max_per_minute,
            count: Arc::new(AtomicU64::new(0)),
            window: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Try to take a slot in the current window.
    pub fn try_acquire(&self) -> bool {
        let minute = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            / 60;
        self.try_acquire_at(minute)
    }

    fn try_acquire_at(&self, minute: u64) -> bool {
        if self.max_per_minute == 0 {
            return true;
        }

        let current = self.window.load(Ordering::Acquire);
        if minute != current
            && self
                .window
                .compare_exchange(current, minute, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.count.store(1, Ordering::Release);
            return true;
        }

        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        prev < self.max_per_minute
    }
}

/// Axum middleware that enforces the rate limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        ApiError::TooManyRequests.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(10));
        assert!(!limiter.try_acquire_at(10));
    }

    #[test]
    fn test_new_window_resets() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire_at(10));
        assert!(!limiter.try_acquire_at(10));
        assert!(limiter.try_acquire_at(11));
        assert!(!limiter.try_acquire_at(11));
    }

    #[test]
    fn test_zero_disables() {
        let limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.try_acquire_at(10));
        }
    }
}
