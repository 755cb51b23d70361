//! Outbound message delivery for the copper-courier platform.
//!
//! This crate provides:
//!
//! - **Connection model**: a workspace's credentialed binding to one
//!   provider instance, with its lifecycle status
//! - **ProviderClient trait**: "deliver one message to one recipient via
//!   one connection", with an implementation per provider kind
//! - **FallbackDispatcher**: tries the primary connection, then ordered
//!   alternates, stopping at first success

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;

pub use client::{GatewayClient, GatewayDefaults, OfficialClient, ProviderClient, SEND_DEADLINE};
pub use connection::{Connection, ConnectionStatus, MessageKind, ProviderKind};
pub use dispatcher::{DispatchOutcome, FallbackDispatcher};
pub use error::DeliveryError;
