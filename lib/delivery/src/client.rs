//! Provider clients: one message, one recipient, one connection.
//!
//! Each client owns the endpoint shape and auth scheme of its provider.
//! A single attempt is bounded by a fixed deadline; retrying and fallback
//! belong to the dispatcher, never to this layer.

use crate::connection::{Connection, MessageKind, ProviderKind};
use crate::error::DeliveryError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::future::Future;
use std::time::Duration;
use ulid::Ulid;

/// Deadline for one provider attempt. Expiry cancels the in-flight request.
pub const SEND_DEADLINE: Duration = Duration::from_secs(30);

/// A delivery backend capable of sending one message over one connection.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The provider kind this client serves.
    fn kind(&self) -> ProviderKind;

    /// Sends `content` to `recipient` via `connection`, returning the
    /// provider-assigned message ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is missing configuration, the
    /// attempt deadline expires, or the provider rejects the request.
    async fn send(
        &self,
        connection: &Connection,
        recipient: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<String, DeliveryError>;
}

/// Runs `fut` under the attempt deadline, mapping expiry to
/// [`DeliveryError::Timeout`]. Dropping the future cancels the underlying
/// request.
pub(crate) async fn with_deadline<T, F>(
    provider: ProviderKind,
    deadline: Duration,
    fut: F,
) -> Result<T, DeliveryError>
where
    F: Future<Output = Result<T, DeliveryError>> + Send,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DeliveryError::Timeout { provider })?
}

/// Service-level defaults for gateway connections that carry no
/// per-connection endpoint or key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayDefaults {
    /// Default gateway base URL.
    pub api_url: Option<String>,
    /// Default gateway API key.
    pub api_key: Option<String>,
}

/// Client for a self-hosted gateway instance.
///
/// Endpoint shape: `POST {base}/message/sendText/{instance_ref}` with an
/// `apikey` header and a `{number, text}` body.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    defaults: GatewayDefaults,
    deadline: Duration,
}

impl GatewayClient {
    /// Creates a gateway client with the given service-level defaults.
    #[must_use]
    pub fn new(defaults: GatewayDefaults) -> Self {
        Self {
            http: reqwest::Client::new(),
            defaults,
            deadline: SEND_DEADLINE,
        }
    }

    /// Overrides the per-attempt deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Resolves the base URL and API key for a connection, preferring the
    /// connection's own values over service defaults.
    fn resolve_target(&self, connection: &Connection) -> Result<(String, String), DeliveryError> {
        let base = connection
            .api_url
            .as_deref()
            .or(self.defaults.api_url.as_deref())
            .ok_or_else(|| DeliveryError::NotConfigured {
                provider: ProviderKind::Gateway,
                reason: "no gateway API URL".to_string(),
            })?;
        let key = connection
            .credential
            .as_deref()
            .or(self.defaults.api_key.as_deref())
            .ok_or_else(|| DeliveryError::NotConfigured {
                provider: ProviderKind::Gateway,
                reason: "no gateway API key".to_string(),
            })?;
        Ok((base.to_string(), key.to_string()))
    }
}

/// Builds the gateway send endpoint for an instance.
fn gateway_send_url(base: &str, instance_ref: &str) -> String {
    format!(
        "{}/message/sendText/{instance_ref}",
        base.trim_end_matches('/')
    )
}

#[async_trait]
impl ProviderClient for GatewayClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gateway
    }

    async fn send(
        &self,
        connection: &Connection,
        recipient: &str,
        content: &str,
        _kind: MessageKind,
    ) -> Result<String, DeliveryError> {
        let (base, key) = self.resolve_target(connection)?;
        let url = gateway_send_url(&base, &connection.instance_ref);
        tracing::debug!(connection_id = %connection.id, %url, "gateway send");

        let body = json!({
            "number": recipient,
            "text": content,
        });

        let data = with_deadline(ProviderKind::Gateway, self.deadline, async {
            let response = self
                .http
                .post(&url)
                .header("apikey", &key)
                .json(&body)
                .send()
                .await
                .map_err(|e| provider_error(ProviderKind::Gateway, e))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(DeliveryError::Provider {
                    provider: ProviderKind::Gateway,
                    detail: format!("status {status}: {text}"),
                });
            }

            response
                .json::<JsonValue>()
                .await
                .map_err(|e| provider_error(ProviderKind::Gateway, e))
        })
        .await?;

        Ok(extract_message_id(&data, &["/key/id", "/messageId"]))
    }
}

/// Client for the channel's official business API.
///
/// Endpoint shape: `POST {base}/{instance_ref}/messages` with a bearer
/// token; `instance_ref` is the provider-side phone-number ID.
#[derive(Debug, Clone)]
pub struct OfficialClient {
    http: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

/// Default base URL for the official business API.
const OFFICIAL_API_BASE: &str = "https://graph.facebook.com/v18.0";

impl OfficialClient {
    /// Creates a client against the default API base.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(OFFICIAL_API_BASE)
    }

    /// Creates a client against a custom API base (used by tests).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            deadline: SEND_DEADLINE,
        }
    }

    /// Overrides the per-attempt deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Default for OfficialClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for OfficialClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Official
    }

    async fn send(
        &self,
        connection: &Connection,
        recipient: &str,
        content: &str,
        _kind: MessageKind,
    ) -> Result<String, DeliveryError> {
        let token =
            connection
                .credential
                .as_deref()
                .ok_or_else(|| DeliveryError::NotConfigured {
                    provider: ProviderKind::Official,
                    reason: "no access token".to_string(),
                })?;
        if connection.instance_ref.is_empty() {
            return Err(DeliveryError::NotConfigured {
                provider: ProviderKind::Official,
                reason: "no phone number ID".to_string(),
            });
        }

        let url = format!(
            "{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            connection.instance_ref
        );
        tracing::debug!(connection_id = %connection.id, %url, "official send");

        let body = json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": content },
        });

        let data = with_deadline(ProviderKind::Official, self.deadline, async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| provider_error(ProviderKind::Official, e))?;

            let status = response.status();
            let data = response
                .json::<JsonValue>()
                .await
                .map_err(|e| provider_error(ProviderKind::Official, e))?;

            if !status.is_success() {
                let detail = data
                    .pointer("/error/message")
                    .and_then(JsonValue::as_str)
                    .map_or_else(|| format!("status {status}"), ToString::to_string);
                return Err(DeliveryError::Provider {
                    provider: ProviderKind::Official,
                    detail,
                });
            }

            Ok(data)
        })
        .await?;

        Ok(extract_message_id(&data, &["/messages/0/id"]))
    }
}

fn provider_error(provider: ProviderKind, e: reqwest::Error) -> DeliveryError {
    DeliveryError::Provider {
        provider,
        detail: e.to_string(),
    }
}

/// Pulls the provider-assigned message ID out of a response payload,
/// falling back to a fresh ULID when the provider omits it.
fn extract_message_id(data: &JsonValue, pointers: &[&str]) -> String {
    pointers
        .iter()
        .find_map(|p| data.pointer(p).and_then(JsonValue::as_str))
        .map_or_else(|| Ulid::new().to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use copper_courier_core::{ConnectionId, WorkspaceId};

    fn gateway_connection(api_url: Option<&str>, credential: Option<&str>) -> Connection {
        Connection {
            id: ConnectionId::new(),
            workspace_id: WorkspaceId::new(),
            provider: ProviderKind::Gateway,
            status: crate::connection::ConnectionStatus::Connected,
            instance_ref: "main".to_string(),
            credential: credential.map(ToString::to_string),
            api_url: api_url.map(ToString::to_string),
            display_address: None,
        }
    }

    #[test]
    fn gateway_url_strips_trailing_slash() {
        assert_eq!(
            gateway_send_url("https://gw.example.com/", "main"),
            "https://gw.example.com/message/sendText/main"
        );
    }

    #[test]
    fn gateway_target_prefers_connection_values() {
        let client = GatewayClient::new(GatewayDefaults {
            api_url: Some("https://default.example.com".to_string()),
            api_key: Some("default-key".to_string()),
        });

        let connection = gateway_connection(Some("https://own.example.com"), Some("own-key"));
        let (base, key) = client.resolve_target(&connection).expect("resolved");
        assert_eq!(base, "https://own.example.com");
        assert_eq!(key, "own-key");

        let bare = gateway_connection(None, None);
        let (base, key) = client.resolve_target(&bare).expect("resolved");
        assert_eq!(base, "https://default.example.com");
        assert_eq!(key, "default-key");
    }

    #[test]
    fn gateway_target_requires_some_configuration() {
        let client = GatewayClient::new(GatewayDefaults::default());
        let err = client
            .resolve_target(&gateway_connection(None, Some("key")))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured { .. }));
    }

    #[test]
    fn message_id_extraction_order() {
        let data = serde_json::json!({ "key": { "id": "gw-123" }, "messageId": "other" });
        assert_eq!(
            extract_message_id(&data, &["/key/id", "/messageId"]),
            "gw-123"
        );

        let data = serde_json::json!({ "messages": [{ "id": "wamid.1" }] });
        assert_eq!(extract_message_id(&data, &["/messages/0/id"]), "wamid.1");

        // Missing ID falls back to a generated one.
        let data = serde_json::json!({});
        assert!(!extract_message_id(&data, &["/messages/0/id"]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_maps_to_timeout() {
        let hung = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok("never".to_string())
        };
        let err = with_deadline(ProviderKind::Gateway, SEND_DEADLINE, hung)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Timeout {
                provider: ProviderKind::Gateway
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_passes_prompt_results_through() {
        let prompt = async { Ok("id-1".to_string()) };
        let id = with_deadline(ProviderKind::Official, SEND_DEADLINE, prompt)
            .await
            .expect("within deadline");
        assert_eq!(id, "id-1");
    }
}
