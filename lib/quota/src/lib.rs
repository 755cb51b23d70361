//! Persisted sliding-window rate limiting for the copper-courier platform.
//!
//! This crate provides:
//!
//! - **RateLimitStore trait**: atomic conditional operations over persisted
//!   counters, so concurrent handlers (or replicas) share one quota
//! - **RateLimiter**: window semantics composed from those operations
//! - **MemoryRateLimitStore**: in-process store for tests and local runs

pub mod limiter;
pub mod store;

pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use store::{MemoryRateLimitStore, QuotaStoreError, RateLimitRecord, RateLimitStore};
