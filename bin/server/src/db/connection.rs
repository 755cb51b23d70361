//! Repository for provider connections.
//!
//! Connections are written by the external pairing/authorization flow;
//! this side only reads them.

use copper_courier_core::{ConnectionId, WorkspaceId};
use copper_courier_delivery::{Connection, ConnectionStatus, ProviderKind};
use sqlx::{FromRow, PgPool};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Row type for connection queries.
#[derive(FromRow)]
struct ConnectionRow {
    id: String,
    workspace_id: String,
    provider: String,
    status: String,
    instance_ref: String,
    credential: Option<String>,
    api_url: Option<String>,
    display_address: Option<String>,
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message,
    )))
}

impl ConnectionRow {
    fn try_into_connection(self) -> Result<Connection, sqlx::Error> {
        let id = ConnectionId::from_str(&self.id)
            .map_err(|e| decode_error(format!("invalid connection id '{}': {}", self.id, e)))?;
        let workspace_id = WorkspaceId::from_str(&self.workspace_id).map_err(|e| {
            decode_error(format!(
                "invalid workspace id '{}': {}",
                self.workspace_id, e
            ))
        })?;
        let provider = match self.provider.as_str() {
            "gateway" => ProviderKind::Gateway,
            "official" => ProviderKind::Official,
            other => {
                return Err(decode_error(format!("unknown provider kind '{other}'")));
            }
        };

        Ok(Connection {
            id,
            workspace_id,
            provider,
            status: ConnectionStatus::from_str_value(&self.status),
            instance_ref: self.instance_ref,
            credential: self.credential,
            api_url: self.api_url,
            display_address: self.display_address,
        })
    }
}

/// Read access to a workspace's provider connections.
pub struct ConnectionRepository {
    pool: PgPool,
}

impl ConnectionRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a connection by ID.
    pub async fn find_by_id(&self, id: ConnectionId) -> Result<Option<Connection>, sqlx::Error> {
        let row: Option<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, provider, status, instance_ref,
                   credential, api_url, display_address
            FROM channel_connections
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into_connection()?)),
            None => Ok(None),
        }
    }

    /// Lists a workspace's connections that are ready for delivery.
    ///
    /// Ordered by creation time so the fallback chain is deterministic.
    pub async fn list_connected(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<Connection>, sqlx::Error> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, provider, status, instance_ref,
                   credential, api_url, display_address
            FROM channel_connections
            WHERE workspace_id = $1 AND status = 'connected'
            ORDER BY created_at ASC
            "#,
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into_connection()).collect()
    }

    /// Polls a connection's persisted status until it reaches `target`, a
    /// terminal `Disconnected`, or the timeout elapses.
    ///
    /// Used by pairing-flow consumers to observe authorization progress;
    /// the status field is the only thing inspected.
    pub async fn wait_for_status(
        &self,
        id: ConnectionId,
        target: ConnectionStatus,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<StatusWait, sqlx::Error> {
        poll_status(
            || self.find_by_id(id),
            target,
            timeout,
            poll_interval,
        )
        .await
    }
}

/// Outcome of waiting on a connection status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusWait {
    /// The target status was observed.
    Reached(ConnectionStatus),
    /// A terminal status short-circuited the wait.
    Terminal(ConnectionStatus),
    /// The timeout elapsed first; carries the last observed status.
    TimedOut(Option<ConnectionStatus>),
}

/// Status polling loop, generic over the fetch so it can be driven by a
/// repository or, in tests, by a scripted source.
async fn poll_status<F, Fut>(
    fetch: F,
    target: ConnectionStatus,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<StatusWait, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<Connection>, sqlx::Error>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_seen = None;

    loop {
        if let Some(connection) = fetch().await? {
            let status = connection.status;
            last_seen = Some(status);
            if status == target {
                return Ok(StatusWait::Reached(status));
            }
            if status == ConnectionStatus::Disconnected {
                return Ok(StatusWait::Terminal(status));
            }
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Ok(StatusWait::TimedOut(last_seen));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copper_courier_core::{ConnectionId, WorkspaceId};
    use std::sync::Mutex;

    fn connection_with_status(status: ConnectionStatus) -> Connection {
        Connection {
            id: ConnectionId::new(),
            workspace_id: WorkspaceId::new(),
            provider: ProviderKind::Gateway,
            status,
            instance_ref: "main".to_string(),
            credential: None,
            api_url: None,
            display_address: None,
        }
    }

    /// Yields a scripted sequence of statuses, repeating the last one.
    struct StatusScript {
        statuses: Mutex<Vec<ConnectionStatus>>,
    }

    impl StatusScript {
        fn new(statuses: Vec<ConnectionStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
            }
        }

        fn next(&self) -> Result<Option<Connection>, sqlx::Error> {
            let mut statuses = self.statuses.lock().expect("script lock");
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            Ok(Some(connection_with_status(status)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_observes_the_target_status() {
        let script = StatusScript::new(vec![
            ConnectionStatus::Pending,
            ConnectionStatus::Authorizing,
            ConnectionStatus::Connected,
        ]);

        let outcome = poll_status(
            || async { script.next() },
            ConnectionStatus::Connected,
            Duration::from_secs(60),
            Duration::from_secs(2),
        )
        .await
        .expect("poll");

        assert_eq!(outcome, StatusWait::Reached(ConnectionStatus::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_at_terminal_status() {
        let script = StatusScript::new(vec![
            ConnectionStatus::Authorizing,
            ConnectionStatus::Disconnected,
        ]);

        let outcome = poll_status(
            || async { script.next() },
            ConnectionStatus::Connected,
            Duration::from_secs(60),
            Duration::from_secs(2),
        )
        .await
        .expect("poll");

        assert_eq!(
            outcome,
            StatusWait::Terminal(ConnectionStatus::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polling_times_out_with_last_observed_status() {
        let script = StatusScript::new(vec![ConnectionStatus::Authorizing]);

        let outcome = poll_status(
            || async { script.next() },
            ConnectionStatus::Connected,
            Duration::from_secs(10),
            Duration::from_secs(3),
        )
        .await
        .expect("poll");

        assert_eq!(
            outcome,
            StatusWait::TimedOut(Some(ConnectionStatus::Authorizing))
        );
    }
}
