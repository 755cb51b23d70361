//! Persisted counter storage for rate limiting.
//!
//! The store exposes conditional operations rather than plain reads and
//! writes: a read-then-write sequence races under concurrent callers, so
//! every mutation here is guarded by the state it expects to see. Backends
//! implement the guards atomically (a conditional `UPDATE` in SQL, a single
//! critical section in memory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// A persisted rate-limit counter, unique per `(identifier, operation)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Who is being limited (e.g. `profile:prof_...` or `ip:1.2.3.4`).
    pub identifier: String,
    /// The operation being limited (e.g. `message_send`).
    pub operation: String,
    /// Requests counted in the current window.
    pub count: u32,
    /// When the current window started.
    pub window_start: DateTime<Utc>,
    /// When the current window ends and the counter resets.
    pub reset_at: DateTime<Utc>,
}

/// Error from a rate-limit store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaStoreError {
    /// The backing store could not be reached or the query failed.
    Unavailable { reason: String },
}

impl fmt::Display for QuotaStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => {
                write!(f, "rate limit store unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for QuotaStoreError {}

/// Atomic counter operations backing the rate limiter.
///
/// Each method is a single compare-and-act step; callers compose them and
/// retry when a guard fails because another caller got there first.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Fetches the record for a key, if one exists.
    async fn fetch(
        &self,
        identifier: &str,
        operation: &str,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError>;

    /// Inserts a fresh record with `count = 1`.
    ///
    /// Returns `false` without modifying anything if the key already exists.
    async fn try_insert(
        &self,
        identifier: &str,
        operation: &str,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<bool, QuotaStoreError>;

    /// Increments the counter only if `count < max_requests` and the window
    /// has not expired (`reset_at > now`).
    ///
    /// Returns the updated record, or `None` if the guard did not hold
    /// (missing record, expired window, or exhausted quota).
    async fn try_increment(
        &self,
        identifier: &str,
        operation: &str,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError>;

    /// Starts a new window with `count = 1`, only if the current window has
    /// expired (`reset_at <= now`).
    ///
    /// Returns the updated record, or `None` if another caller already
    /// reset the window.
    async fn try_reset(
        &self,
        identifier: &str,
        operation: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError>;
}

/// In-process store keyed by `(identifier, operation)`.
///
/// All guards run under one mutex, which makes every operation trivially
/// atomic. Suitable for tests and single-process development runs; shared
/// deployments use the Postgres-backed store in the server crate.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    records: Mutex<HashMap<(String, String), RateLimitRecord>>,
}

impl MemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn fetch(
        &self,
        identifier: &str,
        operation: &str,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let records = self.records.lock().expect("rate limit store lock");
        Ok(records
            .get(&(identifier.to_string(), operation.to_string()))
            .cloned())
    }

    async fn try_insert(
        &self,
        identifier: &str,
        operation: &str,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<bool, QuotaStoreError> {
        let mut records = self.records.lock().expect("rate limit store lock");
        let key = (identifier.to_string(), operation.to_string());
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(
            key,
            RateLimitRecord {
                identifier: identifier.to_string(),
                operation: operation.to_string(),
                count: 1,
                window_start,
                reset_at,
            },
        );
        Ok(true)
    }

    async fn try_increment(
        &self,
        identifier: &str,
        operation: &str,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let mut records = self.records.lock().expect("rate limit store lock");
        let key = (identifier.to_string(), operation.to_string());
        let Some(record) = records.get_mut(&key) else {
            return Ok(None);
        };
        if record.count >= max_requests || record.reset_at <= now {
            return Ok(None);
        }
        record.count += 1;
        Ok(Some(record.clone()))
    }

    async fn try_reset(
        &self,
        identifier: &str,
        operation: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let mut records = self.records.lock().expect("rate limit store lock");
        let key = (identifier.to_string(), operation.to_string());
        let Some(record) = records.get_mut(&key) else {
            return Ok(None);
        };
        if record.reset_at > now {
            return Ok(None);
        }
        record.count = 1;
        record.window_start = window_start;
        record.reset_at = reset_at;
        Ok(Some(record.clone()))
    }
}
