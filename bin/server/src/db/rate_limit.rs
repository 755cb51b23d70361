//! Postgres-backed rate-limit counter store.
//!
//! Every guard runs inside the statement itself (conditional `UPDATE`,
//! `ON CONFLICT DO NOTHING`), so concurrent handlers and replicas sharing
//! the table cannot collectively exceed a quota.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use copper_courier_quota::{QuotaStoreError, RateLimitRecord, RateLimitStore};
use sqlx::{FromRow, PgPool};

/// Rate-limit store over the `rate_limits` table.
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RateLimitRow {
    identifier: String,
    operation: String,
    request_count: i32,
    window_start: DateTime<Utc>,
    reset_at: DateTime<Utc>,
}

impl From<RateLimitRow> for RateLimitRecord {
    fn from(row: RateLimitRow) -> Self {
        Self {
            identifier: row.identifier,
            operation: row.operation,
            count: u32::try_from(row.request_count).unwrap_or(0),
            window_start: row.window_start,
            reset_at: row.reset_at,
        }
    }
}

fn store_error(e: sqlx::Error) -> QuotaStoreError {
    QuotaStoreError::Unavailable {
        reason: e.to_string(),
    }
}

fn bind_max(max_requests: u32) -> i32 {
    i32::try_from(max_requests).unwrap_or(i32::MAX)
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn fetch(
        &self,
        identifier: &str,
        operation: &str,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let row: Option<RateLimitRow> = sqlx::query_as(
            r#"
            SELECT identifier, operation, request_count, window_start, reset_at
            FROM rate_limits
            WHERE identifier = $1 AND operation = $2
            "#,
        )
        .bind(identifier)
        .bind(operation)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(RateLimitRecord::from))
    }

    async fn try_insert(
        &self,
        identifier: &str,
        operation: &str,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<bool, QuotaStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rate_limits (identifier, operation, request_count, window_start, reset_at)
            VALUES ($1, $2, 1, $3, $4)
            ON CONFLICT (identifier, operation) DO NOTHING
            "#,
        )
        .bind(identifier)
        .bind(operation)
        .bind(window_start)
        .bind(reset_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn try_increment(
        &self,
        identifier: &str,
        operation: &str,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let row: Option<RateLimitRow> = sqlx::query_as(
            r#"
            UPDATE rate_limits
            SET request_count = request_count + 1
            WHERE identifier = $1 AND operation = $2
              AND request_count < $3 AND reset_at > $4
            RETURNING identifier, operation, request_count, window_start, reset_at
            "#,
        )
        .bind(identifier)
        .bind(operation)
        .bind(bind_max(max_requests))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(RateLimitRecord::from))
    }

    async fn try_reset(
        &self,
        identifier: &str,
        operation: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Result<Option<RateLimitRecord>, QuotaStoreError> {
        let row: Option<RateLimitRow> = sqlx::query_as(
            r#"
            UPDATE rate_limits
            SET request_count = 1, window_start = $3, reset_at = $4
            WHERE identifier = $1 AND operation = $2 AND reset_at <= $5
            RETURNING identifier, operation, request_count, window_start, reset_at
            "#,
        )
        .bind(identifier)
        .bind(operation)
        .bind(window_start)
        .bind(reset_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(RateLimitRecord::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_clamps_negative_counts() {
        let now = Utc::now();
        let record = RateLimitRecord::from(RateLimitRow {
            identifier: "ip:10.0.0.1".to_string(),
            operation: "message_send".to_string(),
            request_count: -3,
            window_start: now,
            reset_at: now,
        });
        assert_eq!(record.count, 0);
    }

    #[test]
    fn max_binding_saturates() {
        assert_eq!(bind_max(5), 5);
        assert_eq!(bind_max(u32::MAX), i32::MAX);
    }
}
