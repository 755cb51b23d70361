//! API error taxonomy and HTTP mapping.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use copper_courier_delivery::ConnectionStatus;
use copper_courier_quota::RateLimitDecision;
use serde_json::json;
use std::fmt;

/// Errors surfaced by the send endpoint.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or missing input; never retried.
    Validation { reason: String },
    /// The requested connection does not exist.
    NotFound { connection_id: String },
    /// The target connection is not ready; no provider attempt was made.
    NotConnected { status: ConnectionStatus },
    /// The caller's quota is exhausted.
    RateLimited {
        decision: RateLimitDecision,
        limit: u32,
    },
    /// The primary and every fallback provider failed.
    DeliveryFailed { detail: String },
    /// Unexpected fault; detail stays server-side.
    Internal { detail: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "invalid request: {reason}"),
            Self::NotFound { connection_id } => {
                write!(f, "connection '{connection_id}' not found")
            }
            Self::NotConnected { status } => {
                write!(f, "connection is not ready (status: {status})")
            }
            Self::RateLimited { decision, limit } => {
                write!(
                    f,
                    "rate limit of {limit} exceeded, retry after {}s",
                    decision.retry_after_secs.unwrap_or(0)
                )
            }
            Self::DeliveryFailed { detail } => write!(f, "{detail}"),
            Self::Internal { detail } => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::NotConnected { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::DeliveryFailed { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message returned to the caller. Internal faults are logged with
    /// full detail but never leak it.
    fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Builds the `X-RateLimit-*` headers for a decision.
pub fn rate_limit_headers(decision: &RateLimitDecision, limit: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from_str(&limit.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&decision.remaining.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from_str(&decision.resets_at.to_rfc3339())
            .unwrap_or(HeaderValue::from_static("")),
    );
    headers
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal { detail } = &self {
            tracing::error!(detail = %detail, "unhandled fault in send endpoint");
        }

        let status = self.status_code();
        let mut body = json!({
            "success": false,
            "error": self.public_message(),
        });

        let mut headers = HeaderMap::new();
        if let Self::RateLimited { decision, limit } = &self {
            let retry_after = decision.retry_after_secs.unwrap_or(60);
            body["retry_after"] = json!(retry_after);
            headers = rate_limit_headers(decision, *limit);
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after.to_string())
                    .unwrap_or(HeaderValue::from_static("60")),
            );
        }

        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn status_codes_match_the_contract() {
        assert_eq!(
            ApiError::Validation {
                reason: "missing 'to'".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound {
                connection_id: "conn_x".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NotConnected {
                status: ConnectionStatus::Pending
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::DeliveryFailed {
                detail: "all providers failed".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ApiError::Internal {
            detail: "database password rejected".to_string(),
        };
        assert_eq!(err.public_message(), "internal server error");
    }

    #[test]
    fn rate_limited_display_includes_retry_hint() {
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            resets_at: Utc::now(),
            retry_after_secs: Some(42),
        };
        let err = ApiError::RateLimited {
            decision,
            limit: 100,
        };
        assert!(err.to_string().contains("42"));
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
