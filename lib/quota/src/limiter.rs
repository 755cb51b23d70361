//! Sliding-window admission control over a persisted counter store.

use crate::store::{QuotaStoreError, RateLimitStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Conflict retries before giving up on a contended key.
///
/// Conflicts only occur when callers race on creating or resetting a
/// window; once a record exists the increment path is a single atomic step.
const MAX_CONFLICT_RETRIES: u32 = 8;

/// Rate limit configuration for one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration in seconds.
    pub window_seconds: u32,
}

impl RateLimitConfig {
    /// Creates a new rate limit configuration.
    #[must_use]
    pub fn new(max_requests: u32, window_seconds: u32) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    /// Common limit: requests per minute.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60)
    }

    /// Common limit: requests per hour.
    #[must_use]
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, 3600)
    }

    /// Returns the window duration.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.window_seconds))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window resets.
    pub resets_at: DateTime<Utc>,
    /// Seconds until retry is worthwhile; set only when denied.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn allowed(remaining: u32, resets_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            remaining,
            resets_at,
            retry_after_secs: None,
        }
    }

    fn denied(resets_at: DateTime<Utc>, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            resets_at,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Sliding-window rate limiter backed by a [`RateLimitStore`].
///
/// The limiter holds no counter state of its own; replicas sharing one
/// store enforce one quota. Store failures are fail-open: availability of
/// message sending outweighs strict enforcement during a storage outage.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Creates a limiter over the given store.
    #[must_use]
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Checks whether a request for `(identifier, operation)` is admitted,
    /// counting it if so.
    ///
    /// Store errors are logged and the request is allowed with a
    /// best-effort remaining estimate.
    pub async fn check(&self, identifier: &str, operation: &str) -> RateLimitDecision {
        match self.check_inner(identifier, operation).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    identifier,
                    operation,
                    error = %e,
                    "rate limit store error, allowing request"
                );
                RateLimitDecision::allowed(self.config.max_requests, Utc::now() + self.config.window())
            }
        }
    }

    async fn check_inner(
        &self,
        identifier: &str,
        operation: &str,
    ) -> Result<RateLimitDecision, QuotaStoreError> {
        let max = self.config.max_requests;

        for _ in 0..MAX_CONFLICT_RETRIES {
            let now = Utc::now();

            // Fast path: one atomic conditional increment.
            if let Some(record) = self
                .store
                .try_increment(identifier, operation, max, now)
                .await?
            {
                return Ok(RateLimitDecision::allowed(
                    max.saturating_sub(record.count),
                    record.reset_at,
                ));
            }

            // Increment refused: no record yet, window expired, or quota
            // exhausted. Distinguish by fetching the current state.
            let Some(record) = self.store.fetch(identifier, operation).await? else {
                let reset_at = now + self.config.window();
                if self
                    .store
                    .try_insert(identifier, operation, now, reset_at)
                    .await?
                {
                    return Ok(RateLimitDecision::allowed(max.saturating_sub(1), reset_at));
                }
                // Lost the creation race; the record exists now.
                continue;
            };

            if now >= record.reset_at {
                let reset_at = now + self.config.window();
                if let Some(record) = self
                    .store
                    .try_reset(identifier, operation, now, now, reset_at)
                    .await?
                {
                    return Ok(RateLimitDecision::allowed(
                        max.saturating_sub(record.count),
                        record.reset_at,
                    ));
                }
                // Another caller opened the new window first.
                continue;
            }

            if record.count >= max {
                return Ok(RateLimitDecision::denied(
                    record.reset_at,
                    retry_after_secs(record.reset_at, now),
                ));
            }

            // count < max in a live window, yet the increment was refused:
            // the record changed between the two steps. Retry.
        }

        // Retries only run out under pathological contention. Denying keeps
        // the quota invariant intact; allowing here could exceed it.
        tracing::warn!(
            identifier,
            operation,
            "rate limit conflict retries exhausted, denying request"
        );
        Ok(RateLimitDecision::denied(Utc::now(), 1))
    }
}

/// Seconds until `reset_at`, rounded up, never below 1.
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0);
    let secs = (millis + 999) / 1000;
    (secs as u64).max(1)
}
