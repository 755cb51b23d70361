//! Fallback dispatch across a primary connection and ordered alternates.
//!
//! Attempts are strictly sequential: running two attempts at once could
//! deliver the same message twice, and at most one delivered copy per
//! request takes priority over latency.

use crate::client::ProviderClient;
use crate::connection::{Connection, MessageKind, ProviderKind};
use crate::error::DeliveryError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// The result of a successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// Provider that delivered the message.
    pub provider: ProviderKind,
    /// Provider-assigned message ID.
    pub message_id: String,
    /// Whether an alternate connection delivered instead of the primary.
    pub used_fallback: bool,
}

/// Orchestrates provider attempts across a primary connection and
/// registry-supplied alternates.
#[derive(Clone, Default)]
pub struct FallbackDispatcher {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl FallbackDispatcher {
    /// Creates a dispatcher with no registered clients.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client for its provider kind.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(client.kind(), client);
        self
    }

    fn client_for(&self, kind: ProviderKind) -> Result<&Arc<dyn ProviderClient>, DeliveryError> {
        self.clients
            .get(&kind)
            .ok_or_else(|| DeliveryError::NotConfigured {
                provider: kind,
                reason: "no client registered".to_string(),
            })
    }

    async fn attempt(
        &self,
        connection: &Connection,
        recipient: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<String, DeliveryError> {
        self.client_for(connection.provider)?
            .send(connection, recipient, content, kind)
            .await
    }

    /// Delivers one message, trying `primary` first and then each fallback
    /// candidate in order, stopping at the first success.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::AllProvidersFailed`] carrying the primary's
    /// failure detail when every attempt fails.
    pub async fn dispatch(
        &self,
        primary: &Connection,
        candidates: &[Connection],
        recipient: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<DispatchOutcome, DeliveryError> {
        tracing::info!(
            connection_id = %primary.id,
            provider = %primary.provider,
            "attempting primary provider"
        );

        let primary_err = match self.attempt(primary, recipient, content, kind).await {
            Ok(message_id) => {
                return Ok(DispatchOutcome {
                    provider: primary.provider,
                    message_id,
                    used_fallback: false,
                });
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %primary.id,
                    provider = %primary.provider,
                    error = %e,
                    "primary provider failed"
                );
                e
            }
        };

        let mut attempts = 1;
        for candidate in fallback_order(primary, candidates) {
            tracing::info!(
                connection_id = %candidate.id,
                provider = %candidate.provider,
                "attempting fallback provider"
            );
            attempts += 1;

            match self.attempt(candidate, recipient, content, kind).await {
                Ok(message_id) => {
                    tracing::info!(
                        connection_id = %candidate.id,
                        provider = %candidate.provider,
                        "fallback succeeded"
                    );
                    return Ok(DispatchOutcome {
                        provider: candidate.provider,
                        message_id,
                        used_fallback: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %candidate.id,
                        provider = %candidate.provider,
                        error = %e,
                        "fallback provider failed"
                    );
                }
            }
        }

        Err(DeliveryError::AllProvidersFailed {
            primary: primary.provider,
            primary_detail: primary_err.to_string(),
            attempts,
        })
    }
}

/// Orders fallback candidates: same-kind alternates first (they share
/// configuration with the primary), then the remaining kinds. The primary
/// itself is excluded.
fn fallback_order<'a>(primary: &Connection, candidates: &'a [Connection]) -> Vec<&'a Connection> {
    let mut ordered: Vec<&Connection> = candidates
        .iter()
        .filter(|c| c.id != primary.id && c.provider == primary.provider)
        .collect();
    ordered.extend(
        candidates
            .iter()
            .filter(|c| c.id != primary.id && c.provider != primary.provider),
    );
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use async_trait::async_trait;
    use copper_courier_core::{ConnectionId, WorkspaceId};
    use std::sync::Mutex;
    use std::time::Duration;

    fn connection(provider: ProviderKind) -> Connection {
        Connection {
            id: ConnectionId::new(),
            workspace_id: WorkspaceId::new(),
            provider,
            status: ConnectionStatus::Connected,
            instance_ref: "main".to_string(),
            credential: Some("key".to_string()),
            api_url: Some("https://gw.example.com".to_string()),
            display_address: None,
        }
    }

    /// What a scripted client should do for one connection.
    #[derive(Clone)]
    enum Script {
        Succeed(&'static str),
        Fail(&'static str),
        Hang,
    }

    /// Client scripted per connection ID, recording attempt order.
    struct ScriptedClient {
        kind: ProviderKind,
        scripts: HashMap<ConnectionId, Script>,
        log: Arc<Mutex<Vec<ConnectionId>>>,
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn send(
            &self,
            connection: &Connection,
            _recipient: &str,
            _content: &str,
            _kind: MessageKind,
        ) -> Result<String, DeliveryError> {
            self.log.lock().expect("log lock").push(connection.id);
            match self.scripts.get(&connection.id).expect("scripted") {
                Script::Succeed(id) => Ok((*id).to_string()),
                Script::Fail(detail) => Err(DeliveryError::Provider {
                    provider: self.kind,
                    detail: (*detail).to_string(),
                }),
                Script::Hang => {
                    // Stands in for a provider that never answers; the
                    // client deadline fires first.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(DeliveryError::Timeout {
                        provider: self.kind,
                    })
                }
            }
        }
    }

    struct Harness {
        dispatcher: FallbackDispatcher,
        log: Arc<Mutex<Vec<ConnectionId>>>,
    }

    fn harness(scripts: &[(&Connection, Script)]) -> Harness {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut by_kind: HashMap<ProviderKind, HashMap<ConnectionId, Script>> = HashMap::new();
        for (connection, script) in scripts {
            by_kind
                .entry(connection.provider)
                .or_default()
                .insert(connection.id, script.clone());
        }

        let mut dispatcher = FallbackDispatcher::new();
        for (kind, scripts) in by_kind {
            dispatcher = dispatcher.with_client(Arc::new(ScriptedClient {
                kind,
                scripts,
                log: Arc::clone(&log),
            }));
        }
        Harness { dispatcher, log }
    }

    fn attempts(log: &Arc<Mutex<Vec<ConnectionId>>>) -> Vec<ConnectionId> {
        log.lock().expect("log lock").clone()
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let primary = connection(ProviderKind::Gateway);
        let other = connection(ProviderKind::Gateway);
        let h = harness(&[
            (&primary, Script::Succeed("gw-1")),
            (&other, Script::Succeed("gw-2")),
        ]);

        let outcome = h
            .dispatcher
            .dispatch(
                &primary,
                &[other.clone()],
                "5511999999999",
                "hello",
                MessageKind::Text,
            )
            .await
            .expect("delivered");

        assert_eq!(outcome.message_id, "gw-1");
        assert!(!outcome.used_fallback);
        assert_eq!(attempts(&h.log), vec![primary.id]);
    }

    #[tokio::test]
    async fn same_kind_candidates_attempted_before_other_kinds() {
        let primary = connection(ProviderKind::Gateway);
        let same_kind = connection(ProviderKind::Gateway);
        let other_kind = connection(ProviderKind::Official);
        let h = harness(&[
            (&primary, Script::Fail("primary down")),
            (&same_kind, Script::Fail("also down")),
            (&other_kind, Script::Succeed("wamid.1")),
        ]);

        // Candidates listed cross-kind first; ordering must still prefer
        // the same-kind alternate.
        let outcome = h
            .dispatcher
            .dispatch(
                &primary,
                &[other_kind.clone(), same_kind.clone()],
                "5511999999999",
                "hello",
                MessageKind::Text,
            )
            .await
            .expect("delivered");

        assert!(outcome.used_fallback);
        assert_eq!(outcome.provider, ProviderKind::Official);
        assert_eq!(
            attempts(&h.log),
            vec![primary.id, same_kind.id, other_kind.id]
        );
    }

    #[tokio::test]
    async fn first_fallback_success_stops_the_chain() {
        let primary = connection(ProviderKind::Gateway);
        let second = connection(ProviderKind::Gateway);
        let third = connection(ProviderKind::Official);
        let h = harness(&[
            (&primary, Script::Fail("primary down")),
            (&second, Script::Succeed("gw-2")),
            (&third, Script::Succeed("wamid.1")),
        ]);

        let outcome = h
            .dispatcher
            .dispatch(
                &primary,
                &[second.clone(), third.clone()],
                "5511999999999",
                "hello",
                MessageKind::Text,
            )
            .await
            .expect("delivered");

        assert_eq!(outcome.message_id, "gw-2");
        assert_eq!(attempts(&h.log), vec![primary.id, second.id]);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_primary_detail() {
        let primary = connection(ProviderKind::Gateway);
        let second = connection(ProviderKind::Gateway);
        let third = connection(ProviderKind::Official);
        let h = harness(&[
            (&primary, Script::Fail("primary detail")),
            (&second, Script::Fail("secondary detail")),
            (&third, Script::Fail("tertiary detail")),
        ]);

        let err = h
            .dispatcher
            .dispatch(
                &primary,
                &[second.clone(), third.clone()],
                "5511999999999",
                "hello",
                MessageKind::Text,
            )
            .await
            .unwrap_err();

        match err {
            DeliveryError::AllProvidersFailed {
                primary: kind,
                primary_detail,
                attempts: n,
            } => {
                assert_eq!(kind, ProviderKind::Gateway);
                assert!(primary_detail.contains("primary detail"));
                assert_eq!(n, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(attempts(&h.log), vec![primary.id, second.id, third.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_primary_times_out_then_fallback_runs_alone() {
        let primary = connection(ProviderKind::Gateway);
        let fallback = connection(ProviderKind::Gateway);
        let h = harness(&[
            (&primary, Script::Hang),
            (&fallback, Script::Succeed("gw-2")),
        ]);

        // Bound the hung attempt the way real clients do.
        let dispatcher = h.dispatcher.clone();
        let outcome = tokio::time::timeout(
            Duration::from_secs(7200),
            dispatcher.dispatch(
                &primary,
                std::slice::from_ref(&fallback),
                "5511999999999",
                "hello",
                MessageKind::Text,
            ),
        )
        .await
        .expect("dispatch completes")
        .expect("delivered");

        assert!(outcome.used_fallback);
        // Strictly sequential: the fallback attempt starts only after the
        // primary attempt ended.
        assert_eq!(attempts(&h.log), vec![primary.id, fallback.id]);
    }

    #[test]
    fn fallback_order_excludes_primary() {
        let primary = connection(ProviderKind::Gateway);
        let candidates = vec![primary.clone(), connection(ProviderKind::Official)];
        let ordered = fallback_order(&primary, &candidates);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].provider, ProviderKind::Official);
    }
}
