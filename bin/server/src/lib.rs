//! HTTP API server for copper-courier outbound message delivery.
//!
//! Composes the rate limiter, connection registry, fallback dispatcher,
//! and delivery recorder behind a single send endpoint.

pub mod config;
pub mod db;
pub mod error;
pub mod send;

use axum::{Router, routing::post};
use copper_courier_delivery::FallbackDispatcher;
use copper_courier_quota::RateLimiter;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    /// Database connection pool; repositories are built from it per request.
    pub pool: PgPool,
    /// Sliding-window admission control for the send operation.
    pub limiter: RateLimiter,
    /// Provider attempt orchestration.
    pub dispatcher: FallbackDispatcher,
}

impl AppState {
    /// Creates the application state.
    #[must_use]
    pub fn new(pool: PgPool, limiter: RateLimiter, dispatcher: FallbackDispatcher) -> Self {
        Self {
            pool,
            limiter,
            dispatcher,
        }
    }
}

/// Builds the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/messages/send", post(send::send_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
