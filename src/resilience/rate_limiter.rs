//! # Rate Limiter
//!
//! Sliding-window admission control over a shared request log: at most
//! `max_requests` calls in any trailing `window_seconds`. The log lives in a
//! [`RateLimitStore`] so every process draws from the same allowance.
//!
//! All operations fail open: if the store is unreachable the call is allowed (and
//! [`wait_if_needed`](RateLimiter::wait_if_needed) backs off for a fixed second), logged
//! as degraded.
//!
//! Callers that must record their request use [`acquire_or_wait`](RateLimiter::acquire_or_wait):
//! admission and recording happen in one store operation, so concurrent callers cannot
//! both take the last slot.

use super::config::RateLimitConfig;
use crate::clock::{to_chrono, SharedClock};
use crate::constants::rate_limiting;
use crate::log_resilience;
use crate::store::{RateLimitStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    /// Also the request log key; stores apply the key prefix
    name: String,
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(
        name: impl Into<String>,
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether another request fits in the current window (does not record it)
    pub async fn try_acquire(&self) -> bool {
        match self
            .store
            .count_in_window(&self.name, self.config.window(), self.clock.now())
            .await
        {
            Ok(count) => count < self.config.max_requests,
            Err(error) => {
                self.degraded("try_acquire", &error);
                true
            }
        }
    }

    /// Record one request at the current time
    pub async fn record_usage(&self) {
        if let Err(error) = self
            .store
            .record(&self.name, self.config.window(), self.clock.now())
            .await
        {
            self.degraded("record_usage", &error);
        }
    }

    /// Check and record in one atomic step; `false` means the window is full
    pub async fn acquire(&self) -> bool {
        match self
            .store
            .try_record(
                &self.name,
                self.config.max_requests,
                self.config.window(),
                self.clock.now(),
            )
            .await
        {
            Ok(admitted) => admitted,
            Err(error) => {
                self.degraded("acquire", &error);
                true
            }
        }
    }

    /// Wait until a request is admitted and recorded; returns the total time slept
    ///
    /// Each attempt is an atomic [`acquire`](Self::acquire). A full window sleeps until
    /// its oldest entry expires and tries again, so callers racing for the same slot
    /// queue up instead of overshooting the limit.
    pub async fn acquire_or_wait(&self) -> Duration {
        let mut waited = Duration::ZERO;

        while !self.acquire().await {
            let wait = match self.wait_duration().await {
                Ok(wait) => wait,
                Err(error) => {
                    self.degraded("acquire_or_wait", &error);
                    rate_limiting::DEGRADED_WAIT
                }
            };

            if wait.is_zero() {
                // A slot opened between the two reads
                tokio::task::yield_now().await;
                continue;
            }

            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
            waited += wait;
        }
        waited
    }

    /// Requests left in the current window
    pub async fn remaining(&self) -> u32 {
        match self
            .store
            .count_in_window(&self.name, self.config.window(), self.clock.now())
            .await
        {
            Ok(count) => self.config.max_requests.saturating_sub(count),
            Err(error) => {
                self.degraded("remaining", &error);
                self.config.max_requests
            }
        }
    }

    /// How long a caller must wait before the next request fits, zero if it fits now
    pub async fn wait_duration(&self) -> Result<Duration, StoreError> {
        let now = self.clock.now();
        let window = self.config.window();

        let count = self.store.count_in_window(&self.name, window, now).await?;
        if count < self.config.max_requests {
            return Ok(Duration::ZERO);
        }

        let Some(oldest) = self.store.oldest_in_window(&self.name, window, now).await? else {
            return Ok(Duration::ZERO);
        };

        // window - (now - oldest) + padding
        let expires_at = oldest + to_chrono(window);
        let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
        Ok(remaining + rate_limiting::WAIT_PADDING)
    }

    /// Sleep until the next request fits; returns the time slept
    pub async fn wait_if_needed(&self) -> Duration {
        let wait = match self.wait_duration().await {
            Ok(wait) => wait,
            Err(error) => {
                self.degraded("wait_if_needed", &error);
                rate_limiting::DEGRADED_WAIT
            }
        };

        if !wait.is_zero() {
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
        wait
    }

    fn degraded(&self, operation: &str, error: &StoreError) {
        log_resilience!(warn, "Rate limiter store unavailable, failing open",
            limiter: self.name,
            limiter_operation: operation,
            error: error.to_string()
        );
    }
}
