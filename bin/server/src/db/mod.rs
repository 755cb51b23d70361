//! Database repositories for the copper-courier server.
//!
//! This module provides data access for:
//! - Provider connections (the registry the dispatcher reads)
//! - Conversations and outgoing messages (the delivery recorder)
//! - Persisted rate-limit counters

pub mod connection;
pub mod message;
pub mod rate_limit;

pub use connection::ConnectionRepository;
pub use message::MessageRepository;
pub use rate_limit::PgRateLimitStore;
