//! The send endpoint: rate limit, resolve, dispatch, record.

use crate::AppState;
use crate::db::{ConnectionRepository, MessageRepository};
use crate::error::{ApiError, rate_limit_headers};
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use copper_courier_core::{ConnectionId, ProfileId};
use copper_courier_delivery::{Connection, DispatchOutcome, MessageKind};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Operation name under which send requests are rate limited.
const SEND_OPERATION: &str = "message_send";

/// Request body for `POST /api/messages/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Target connection.
    pub connection_id: String,
    /// Recipient phone number; normalized to digits before dispatch.
    pub to: String,
    /// Message content.
    pub message: String,
    /// Message kind; defaults to text.
    #[serde(default)]
    pub kind: MessageKind,
    /// Reference to previously uploaded media, recorded with the message.
    #[serde(default)]
    pub media_ref: Option<String>,
    /// Sending workspace member, when the external auth layer knows one.
    #[serde(default)]
    pub sender_id: Option<ProfileId>,
}

/// Success body for the send endpoint.
#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    pub provider: copper_courier_delivery::ProviderKind,
    pub used_fallback: bool,
}

impl SendResponse {
    fn from_outcome(outcome: &DispatchOutcome) -> Self {
        Self {
            success: true,
            message_id: outcome.message_id.clone(),
            provider: outcome.provider,
            used_fallback: outcome.used_fallback,
        }
    }
}

/// Handles `POST /api/messages/send`.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> Result<Response, ApiError> {
    // Validation comes before anything that touches the store or network.
    let connection_id = parse_connection_id(&body.connection_id)?;
    let recipient = normalize_recipient(&body.to)?;
    if body.message.trim().is_empty() {
        return Err(ApiError::Validation {
            reason: "missing required field: message".to_string(),
        });
    }

    // Admission control, keyed on the caller identity.
    let identity = caller_identity(body.sender_id, &headers);
    let decision = state.limiter.check(&identity, SEND_OPERATION).await;
    let limit = state.limiter.config().max_requests;
    if !decision.allowed {
        tracing::warn!(identity = %identity, retry_after = ?decision.retry_after_secs, "rate limit exceeded");
        return Err(ApiError::RateLimited { decision, limit });
    }

    // Resolve the target connection; reject before any provider attempt
    // unless it is ready.
    let connections = ConnectionRepository::new(state.pool.clone());
    let primary = connections
        .find_by_id(connection_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound {
            connection_id: body.connection_id.clone(),
        })?;

    ensure_ready(&primary)?;

    // Connected siblings of the primary form the fallback chain. A failure
    // here degrades to no fallback rather than failing the send.
    let candidates = match connections.list_connected(primary.workspace_id).await {
        Ok(connected) => fallback_candidates(&primary, connected),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load fallback candidates");
            Vec::new()
        }
    };

    let outcome = state
        .dispatcher
        .dispatch(&primary, &candidates, &recipient, &body.message, body.kind)
        .await
        .map_err(|e| ApiError::DeliveryFailed {
            detail: e.to_string(),
        })?;

    tracing::info!(
        provider = %outcome.provider,
        message_id = %outcome.message_id,
        used_fallback = outcome.used_fallback,
        "message sent"
    );

    // The provider accepted the message; recording is best-effort.
    record_delivery(&state, &primary, &recipient, &body, &outcome).await;

    let response_headers = rate_limit_headers(&decision, limit);
    Ok((
        response_headers,
        Json(SendResponse::from_outcome(&outcome)),
    )
        .into_response())
}

/// Appends the message row and bumps the conversation counter; failures
/// are logged, never surfaced, since the recipient already has the message.
async fn record_delivery(
    state: &AppState,
    primary: &copper_courier_delivery::Connection,
    recipient: &str,
    body: &SendRequest,
    outcome: &DispatchOutcome,
) {
    let messages = MessageRepository::new(state.pool.clone());

    let conversation_id = match messages
        .find_open_conversation(primary.workspace_id, recipient)
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(recipient, "no open conversation for recipient, skipping record");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve conversation for delivered message");
            return;
        }
    };

    match messages
        .record(
            conversation_id,
            primary.workspace_id,
            &body.message,
            body.kind,
            body.media_ref.as_deref(),
            body.sender_id,
            &outcome.message_id,
            primary.id,
        )
        .await
    {
        Ok(record) => {
            tracing::debug!(
                conversation_id = %record.conversation_id,
                message_id = %record.message_id,
                "outgoing message recorded"
            );
        }
        Err(e) => {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "failed to record delivered message"
            );
        }
    }
}

/// Rejects a connection that is not ready for delivery, before any
/// provider attempt is made.
fn ensure_ready(connection: &Connection) -> Result<(), ApiError> {
    if connection.is_connected() {
        return Ok(());
    }
    tracing::warn!(
        connection_id = %connection.id,
        status = %connection.status,
        "connection not ready"
    );
    Err(ApiError::NotConnected {
        status: connection.status,
    })
}

/// Narrows the registry's connected list to fallback candidates by
/// dropping the primary itself.
fn fallback_candidates(primary: &Connection, connected: Vec<Connection>) -> Vec<Connection> {
    connected
        .into_iter()
        .filter(|c| c.id != primary.id)
        .collect()
}

fn internal(e: sqlx::Error) -> ApiError {
    ApiError::Internal {
        detail: e.to_string(),
    }
}

fn parse_connection_id(raw: &str) -> Result<ConnectionId, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::Validation {
            reason: "missing required field: connection_id".to_string(),
        });
    }
    ConnectionId::from_str(raw).map_err(|e| ApiError::Validation {
        reason: format!("invalid connection_id: {e}"),
    })
}

/// Normalizes a recipient phone number to digits only.
fn normalize_recipient(raw: &str) -> Result<String, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::Validation {
            reason: "missing required field: to".to_string(),
        });
    }
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(ApiError::Validation {
            reason: format!("recipient '{raw}' contains no digits"),
        });
    }
    Ok(digits)
}

/// Derives the rate-limit identity: the sending profile when the external
/// auth layer provided one, otherwise the client IP.
fn caller_identity(sender_id: Option<ProfileId>, headers: &HeaderMap) -> String {
    match sender_id {
        Some(profile) => format!("profile:{profile}"),
        None => format!("ip:{}", client_ip(headers)),
    }
}

/// Client IP as reported by the usual proxy headers.
fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.to_string();
    }
    "unknown".to_string()
}
