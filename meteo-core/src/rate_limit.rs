//! Fixed-window request counter keyed by logical service name.

use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::warn;

use crate::{
    clock::{Clock, add_duration},
    error::AppError,
};

pub const DEFAULT_MAX_REQUESTS: u32 = 60;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
    max_requests: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW, clock)
    }

    pub fn with_limits(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { windows: Mutex::new(HashMap::new()), max_requests, window, clock }
    }

    /// Count a request against `key` and report whether it may proceed.
    ///
    /// A denied call still counts, so the key stays blocked until its
    /// window resets.
    pub fn check(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(window) = windows.get_mut(key) {
            if now < window.reset_at {
                window.count = window.count.saturating_add(1);
                return window.count <= self.max_requests;
            }
        }

        windows.insert(
            key.to_string(),
            RateWindow { count: 1, reset_at: add_duration(now, self.window) },
        );
        true
    }

    /// Time until `key`'s current window resets; zero if it already has.
    pub fn reset_time_remaining(&self, key: &str) -> Duration {
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        windows
            .get(key)
            .and_then(|w| (w.reset_at - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn reset(&self, key: &str) {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    /// [`check`](Self::check), turning a denial into a user-facing error.
    pub fn acquire(&self, key: &str) -> Result<(), AppError> {
        if self.check(key) {
            return Ok(());
        }

        let remaining = self.reset_time_remaining(key);
        warn!(service = key, ?remaining, "rate limit exceeded");

        let minutes = remaining.as_secs().div_ceil(60).max(1);
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        Err(AppError::api(
            format!("Too many requests. Please try again in {minutes} {unit}."),
            true,
        ))
    }
}
