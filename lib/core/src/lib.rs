//! Core domain types for the copper-courier messaging platform.
//!
//! This crate provides the strongly-typed identifiers shared by the
//! quota, delivery, and server crates.

pub mod id;

pub use id::{
    ConnectionId, ConversationId, OutgoingMessageId, ParseIdError, ProfileId, WorkspaceId,
};
