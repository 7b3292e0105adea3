//! Retry with exponential backoff and jitter, aware of [`AppError`] retryability.

use rand::Rng;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    error::{AppError, ErrorKind, make_error},
    network::NetworkMonitor,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Search is interactive: fail fast.
    pub fn geocoding() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            ..Self::default()
        }
    }

    pub fn weather() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            ..Self::default()
        }
    }

    pub fn without_jitter(self) -> Self {
        Self { max_jitter: Duration::ZERO, ..self }
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    monitor: Arc<NetworkMonitor>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, monitor: Arc<NetworkMonitor>) -> Self {
        Self { policy, monitor }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fail fast with the offline error when the monitor reports no connectivity.
    pub fn ensure_online(&self) -> Result<(), AppError> {
        if self.monitor.is_online() {
            Ok(())
        } else {
            Err(AppError::offline())
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget runs out.
    ///
    /// An [`AppError`] with `retryable == false` ends the loop at once and is
    /// returned unchanged. Any other error is retried; when the budget is
    /// spent, an `AppError` is returned as-is and anything else is wrapped
    /// as a retryable `api` error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if let Err(err) = self.ensure_online() {
                debug!(label, attempt, "offline, not attempting request");
                return Err(err);
            }

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let failure = match err.downcast::<AppError>() {
                Ok(app) if !app.is_retryable() => {
                    debug!(label, attempt, error = %app, "non-retryable failure");
                    return Err(app);
                }
                Ok(app) => Ok(app),
                Err(other) => Err(other),
            };

            if attempt >= max_attempts {
                warn!(label, attempts = max_attempts, "giving up");
                return Err(match failure {
                    Ok(app) => app,
                    Err(other) => {
                        let message =
                            format!("{label} failed after {max_attempts} attempts: {other}");
                        let cause: Box<dyn std::error::Error + Send + Sync> = other.into();
                        make_error(ErrorKind::Api, message, true, Some(Arc::from(cause)))
                    }
                });
            }

            let delay = self.policy.backoff_delay(attempt) + self.policy.jitter();
            let error = match &failure {
                Ok(app) => app.to_string(),
                Err(other) => other.to_string(),
            };
            warn!(label, attempt, max_attempts, ?delay, %error, "attempt failed, retrying");

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
