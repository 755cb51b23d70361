//! Delivery recorder: persists outcomes of successful dispatches.
//!
//! Recording happens after the provider accepted the message, so failures
//! here are logged by the caller and never turned into a failed response.

use copper_courier_core::{ConnectionId, ConversationId, OutgoingMessageId, ProfileId, WorkspaceId};
use copper_courier_delivery::MessageKind;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// A recorded outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingRecord {
    /// Row ID of the new message.
    pub message_id: OutgoingMessageId,
    /// Conversation the message was appended to.
    pub conversation_id: ConversationId,
}

/// Repository for conversations and outgoing messages.
pub struct MessageRepository {
    pool: PgPool,
}

#[derive(FromRow)]
struct ConversationIdRow {
    id: String,
}

impl MessageRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds the open conversation for a recipient phone number within a
    /// workspace, resolving through the lead that owns the number.
    pub async fn find_open_conversation(
        &self,
        workspace_id: WorkspaceId,
        phone: &str,
    ) -> Result<Option<ConversationId>, sqlx::Error> {
        let row: Option<ConversationIdRow> = sqlx::query_as(
            r#"
            SELECT c.id
            FROM conversations c
            JOIN leads l ON l.id = c.lead_id
            WHERE c.workspace_id = $1 AND l.phone = $2 AND c.status = 'open'
            LIMIT 1
            "#,
        )
        .bind(workspace_id.to_string())
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let id = ConversationId::from_str(&r.id).map_err(|e| {
                    sqlx::Error::Decode(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid conversation id '{}': {}", r.id, e),
                    )))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Writes one outgoing message row and increments the conversation's
    /// message counter.
    ///
    /// The counter increment is a single atomic `UPDATE`; concurrent
    /// deliveries into the same conversation each add exactly one. Both
    /// writes share a transaction so a recorded message and its count
    /// never diverge.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        conversation_id: ConversationId,
        workspace_id: WorkspaceId,
        content: &str,
        kind: MessageKind,
        media_ref: Option<&str>,
        sender_id: Option<ProfileId>,
        provider_message_id: &str,
        connection_id: ConnectionId,
    ) -> Result<OutgoingRecord, sqlx::Error> {
        let message_id = OutgoingMessageId::new();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, workspace_id, content, kind, sender_kind,
                 sender_id, provider_message_id, connection_id, media_ref)
            VALUES ($1, $2, $3, $4, $5, 'agent', $6, $7, $8, $9)
            "#,
        )
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .bind(workspace_id.to_string())
        .bind(content)
        .bind(kind.as_str())
        .bind(sender_id.map(|id| id.to_string()))
        .bind(provider_message_id)
        .bind(connection_id.to_string())
        .bind(media_ref)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET messages_count = messages_count + 1
            WHERE id = $1
            "#,
        )
        .bind(conversation_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(OutgoingRecord {
            message_id,
            conversation_id,
        })
    }
}
