//! Connection model: a workspace's credentialed binding to one provider.
//!
//! Connections are owned and mutated by the external pairing/authorization
//! flow; delivery only ever reads them.

use copper_courier_core::{ConnectionId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The delivery backend behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Self-hosted gateway instance.
    Gateway,
    /// The channel's official business API.
    Official,
}

impl ProviderKind {
    /// Stable string form, as stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Official => "official",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a connection.
///
/// Driven by the external pairing flow: `Pending → Authorizing →
/// Connected`; authorization may fall back to `Pending` or `Disconnected`,
/// and revocation moves `Connected → Disconnected`. Dispatch only ever
/// considers `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Created, pairing not yet started.
    Pending,
    /// Pairing/authorization in progress.
    Authorizing,
    /// Ready to deliver messages.
    Connected,
    /// Revoked or failed.
    Disconnected,
}

impl ConnectionStatus {
    /// Stable string form, as stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorizing => "authorizing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Parses a stored status string, treating unknown values as pending.
    #[must_use]
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "authorizing" => Self::Authorizing,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credentialed provider connection owned by a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Connection ID.
    pub id: ConnectionId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Which provider backs this connection.
    pub provider: ProviderKind,
    /// Current lifecycle status.
    pub status: ConnectionStatus,
    /// Provider-side instance reference (gateway instance name, or the
    /// official API's phone-number ID).
    pub instance_ref: String,
    /// API key or access token. Falls back to service-level defaults for
    /// gateway connections when absent.
    pub credential: Option<String>,
    /// Per-connection endpoint override for gateway connections.
    pub api_url: Option<String>,
    /// Human-readable address bound to this connection.
    pub display_address: Option<String>,
}

impl Connection {
    /// Returns true if the connection is ready for delivery.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// The kind of message being sent.
///
/// Recorded with the message row; both providers currently carry the
/// content as a text payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text message.
    #[default]
    Text,
    /// Image with caption.
    Image,
    /// Document attachment.
    Document,
}

impl MessageKind {
    /// Stable string form, as stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::Authorizing,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ] {
            assert_eq!(ConnectionStatus::from_str_value(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_is_pending() {
        assert_eq!(
            ConnectionStatus::from_str_value("garbage"),
            ConnectionStatus::Pending
        );
    }

    #[test]
    fn only_connected_is_ready() {
        let mut connection = Connection {
            id: ConnectionId::new(),
            workspace_id: WorkspaceId::new(),
            provider: ProviderKind::Gateway,
            status: ConnectionStatus::Pending,
            instance_ref: "main".to_string(),
            credential: None,
            api_url: None,
            display_address: None,
        };
        assert!(!connection.is_connected());

        connection.status = ConnectionStatus::Connected;
        assert!(connection.is_connected());
    }

    #[test]
    fn provider_kind_serde_form() {
        let json = serde_json::to_string(&ProviderKind::Official).expect("serialize");
        assert_eq!(json, "\"official\"");
    }

    #[test]
    fn message_kind_defaults_to_text() {
        assert_eq!(MessageKind::default(), MessageKind::Text);
    }
}
