//! Broadcast Dispatcher
//!
//! Fans events out to registered sessions. Targets are snapshotted under the
//! registry's read lock, delivered to outside of it, and any target that could
//! not be reached is pruned afterwards. Pruning is the one path through which
//! dead connections leave the registry outside of their own close handling;
//! the liveness monitor funnels through it as well.
//!
//! Announcements are serialized: the participant list is read and queued to
//! its targets while holding the announce lock, so the last `userList` every
//! client receives is never older than one queued before it.

use std::sync::Arc;
use tokio::sync::Mutex;

use super::error::SessionError;
use super::messages::ServerMessage;
use super::registry::Registry;
use super::session::{
    ConnectionId, DeliveryFailure, Outbound, Outbox, Session, CLOSE_NORMAL,
};

/// Outcome of one broadcast pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets the event was queued for
    pub delivered: usize,
    /// Targets removed from the registry because delivery failed
    pub pruned: Vec<ConnectionId>,
}

impl BroadcastReport {
    fn merge(&mut self, other: BroadcastReport) {
        self.delivered += other.delivered;
        self.pruned.extend(other.pruned);
    }
}

/// Best-effort event delivery over the registry
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    announcing: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            announcing: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Send an event to every registered session except `exclude`.
    ///
    /// Never fails: unreachable targets are logged, pruned, and reported.
    pub async fn broadcast(
        &self,
        event: &ServerMessage,
        exclude: Option<&str>,
    ) -> BroadcastReport {
        let frame = match encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(event = event.kind(), error = %e, "Failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let targets = self.registry.sessions().await;
        self.deliver(event, &frame, &targets, exclude).await
    }

    /// Queue an encoded event to `targets` and prune the ones that failed
    async fn deliver(
        &self,
        event: &ServerMessage,
        frame: &Outbound,
        targets: &[Session],
        exclude: Option<&str>,
    ) -> BroadcastReport {
        let (delivered, failures) = fan_out(targets, frame, exclude);

        let mut pruned = Vec::with_capacity(failures.len());
        for (connection_id, failure) in failures {
            let err = SessionError::Delivery {
                connection_id: connection_id.clone(),
                failure,
            };
            tracing::warn!(event = event.kind(), error = %err, "Pruning unreachable session");

            if self.reap(&connection_id, "delivery failed").await.is_some() {
                pruned.push(connection_id);
            }
        }

        tracing::trace!(
            event = event.kind(),
            recipients = delivered,
            pruned = pruned.len(),
            "Broadcast event"
        );

        BroadcastReport { delivered, pruned }
    }

    /// Deliver a direct response to one connection.
    ///
    /// Failures are logged and dropped; the connection's own task notices a
    /// dead transport on its next read.
    pub fn unicast(&self, target: &Outbox, event: &ServerMessage) -> bool {
        let result = encode(event).map_err(|e| e.to_string()).and_then(|frame| {
            target.try_deliver(frame).map_err(|failure| failure.to_string())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    connection_id = %target.connection_id(),
                    event = event.kind(),
                    error = %e,
                    "Unicast failed"
                );
                false
            }
        }
    }

    /// Broadcast a system notice followed by the participant list.
    ///
    /// Both events are queued by this task in order, so every target sees
    /// the notice before the list it refers to. The list and its targets come
    /// from one registry read and are queued before the next announcement
    /// starts.
    pub async fn announce(&self, notice: impl Into<String>) -> BroadcastReport {
        let _guard = self.announcing.lock().await;

        let mut report = self.broadcast(&ServerMessage::system(notice), None).await;

        let (users, targets) = self.registry.roster().await;
        let event = ServerMessage::UserList { users };
        match encode(&event) {
            Ok(frame) => report.merge(self.deliver(&event, &frame, &targets, None).await),
            Err(e) => {
                tracing::error!(event = event.kind(), error = %e, "Failed to serialize event");
            }
        }
        report
    }

    /// Remove a dead connection and wake its handler for cleanup.
    ///
    /// Returns `None` if the connection was already gone.
    pub async fn reap(&self, connection_id: &str, cause: &str) -> Option<Session> {
        let session = self.registry.unregister(connection_id).await?;

        tracing::info!(
            connection_id = %connection_id,
            username = %session.display_name,
            cause,
            "Reaped session"
        );
        session.outbox().mark_reaped();
        Some(session)
    }

    /// Close the registry, tell every participant the server is going away
    /// and ask each connection to close normally. Returns the number of close
    /// requests that were queued.
    ///
    /// Joins that arrive afterwards are refused, so the sessions closed here
    /// are all that is left to drain.
    pub async fn shutdown(&self, notice: impl Into<String>) -> usize {
        let sessions = self.registry.close().await;

        let notice = ServerMessage::system(notice);
        match encode(&notice) {
            Ok(frame) => {
                self.deliver(&notice, &frame, &sessions, None).await;
            }
            Err(e) => {
                tracing::error!(event = notice.kind(), error = %e, "Failed to serialize event");
            }
        }

        let mut closing = 0;
        for session in sessions {
            let frame = Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "server shutting down".to_string(),
            };
            match session.outbox().try_deliver(frame) {
                Ok(()) => closing += 1,
                Err(failure) => {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        error = %failure,
                        "Close request not queued, reaping"
                    );
                    self.reap(&session.connection_id, "shutdown").await;
                }
            }
        }
        closing
    }
}

/// Serialize an event once for all of its targets
fn encode(event: &ServerMessage) -> Result<Outbound, serde_json::Error> {
    let text = serde_json::to_string(event)?;
    Ok(Outbound::Text(Arc::from(text)))
}

/// Queue `frame` for every target but `exclude`, collecting failures
fn fan_out(
    targets: &[Session],
    frame: &Outbound,
    exclude: Option<&str>,
) -> (usize, Vec<(ConnectionId, DeliveryFailure)>) {
    let mut delivered = 0;
    let mut failures = Vec::new();

    for session in targets {
        if exclude == Some(session.connection_id.as_str()) {
            continue;
        }
        match session.outbox().try_deliver(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(failure) => failures.push((session.connection_id.clone(), failure)),
        }
    }

    (delivered, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn join(
        registry: &Registry,
        id: &str,
        name: &str,
    ) -> (Outbox, mpsc::Receiver<Outbound>) {
        let (outbox, rx) = Outbox::channel(id.to_string(), 16);
        registry.try_register(&outbox, name).await.unwrap();
        (outbox, rx)
    }

    fn next_event(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;
        let (_b, mut rx_b) = join(&registry, "b", "bob").await;

        let report = dispatcher
            .broadcast(&ServerMessage::chat("alice", "hi"), None)
            .await;

        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());
        assert_eq!(next_event(&mut rx_a)["message"], "hi");
        assert_eq!(next_event(&mut rx_b)["message"], "hi");
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;
        let (_b, mut rx_b) = join(&registry, "b", "bob").await;

        let typing = ServerMessage::Typing {
            username: "alice".to_string(),
            is_typing: true,
        };
        let report = dispatcher.broadcast(&typing, Some("a")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(next_event(&mut rx_b)["type"], "typing");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_target_is_pruned_without_affecting_others() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;
        let (dead, rx_dead) = join(&registry, "b", "bob").await;
        let (_c, mut rx_c) = join(&registry, "c", "carol").await;
        drop(rx_dead);

        let report = dispatcher
            .broadcast(&ServerMessage::chat("alice", "still here?"), None)
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec!["b".to_string()]);
        assert_eq!(next_event(&mut rx_a)["message"], "still here?");
        assert_eq!(next_event(&mut rx_c)["message"], "still here?");
        assert_eq!(registry.snapshot().await, vec!["alice", "carol"]);

        // The pruned connection's handler gets woken for cleanup
        tokio::time::timeout(Duration::from_secs(1), dead.reaped())
            .await
            .expect("pruned connection should be signalled");
    }

    #[tokio::test]
    async fn test_stalled_target_is_pruned() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (stalled, _rx_stalled) = Outbox::channel("s".to_string(), 1);
        registry.try_register(&stalled, "slowpoke").await.unwrap();
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;

        dispatcher.broadcast(&ServerMessage::chat("alice", "one"), None).await;
        let report = dispatcher.broadcast(&ServerMessage::chat("alice", "two"), None).await;

        assert_eq!(report.pruned, vec!["s".to_string()]);
        assert_eq!(next_event(&mut rx_a)["message"], "one");
        assert_eq!(next_event(&mut rx_a)["message"], "two");
        assert_eq!(registry.snapshot().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_announce_orders_notice_before_list() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;
        let (_b, mut rx_b) = join(&registry, "b", "bob").await;

        dispatcher.announce("bob joined the chat").await;

        for rx in [&mut rx_a, &mut rx_b] {
            let notice = next_event(rx);
            assert_eq!(notice["type"], "system");
            assert_eq!(notice["message"], "bob joined the chat");

            let list = next_event(rx);
            assert_eq!(list["type"], "userList");
            assert_eq!(list["users"], serde_json::json!(["alice", "bob"]));
        }
    }

    #[tokio::test]
    async fn test_unicast_to_closed_target_is_not_an_error() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry);
        let (outbox, rx) = Outbox::channel("x".to_string(), 4);

        assert!(dispatcher.unicast(&outbox, &ServerMessage::error("nope")));
        drop(rx);
        assert!(!dispatcher.unicast(&outbox, &ServerMessage::error("nope")));
    }

    #[tokio::test]
    async fn test_reap_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, _rx_a) = join(&registry, "a", "alice").await;

        assert!(dispatcher.reap("a", "test").await.is_some());
        assert!(dispatcher.reap("a", "test").await.is_none());
    }

    /// Last `userList` queued to `rx`, draining everything else
    fn last_user_list(rx: &mut mpsc::Receiver<Outbound>) -> Option<Vec<String>> {
        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                let event: serde_json::Value = serde_json::from_str(&text).unwrap();
                if event["type"] == "userList" {
                    last = Some(serde_json::from_value(event["users"].clone()).unwrap());
                }
            }
        }
        last
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_announcements_end_on_current_list() {
        for round in 0..50 {
            let registry = Arc::new(Registry::new());
            let dispatcher = Dispatcher::new(Arc::clone(&registry));
            let (observer, mut rx_observer) = Outbox::channel("observer".to_string(), 1024);
            registry.try_register(&observer, "observer").await.unwrap();

            let mut tasks = Vec::new();
            for i in 0..24 {
                let dispatcher = dispatcher.clone();
                tasks.push(tokio::spawn(async move {
                    let (outbox, rx) = Outbox::channel(format!("c{i}"), 1024);
                    let name = format!("user{i}");
                    dispatcher.registry().try_register(&outbox, &name).await.unwrap();
                    dispatcher.announce(format!("{name} joined the chat")).await;
                    // Keep the queue open until every announcement is done
                    rx
                }));
            }

            let mut receivers = Vec::new();
            for task in tasks {
                receivers.push(task.await.unwrap());
            }

            let expected = registry.snapshot().await;
            assert_eq!(expected.len(), 25);
            assert_eq!(
                last_user_list(&mut rx_observer),
                Some(expected),
                "round {round}"
            );
        }
    }

    #[tokio::test]
    async fn test_shutdown_refuses_later_joins() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, _rx_a) = join(&registry, "a", "alice").await;

        assert_eq!(dispatcher.shutdown("Server is shutting down").await, 1);

        let (late, _rx_late) = Outbox::channel("b".to_string(), 16);
        let result = registry.try_register(&late, "bob").await;
        assert!(matches!(result, Err(crate::websocket::RegistryError::Closed)));
        assert_eq!(registry.snapshot().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_then_closes() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        let (_a, mut rx_a) = join(&registry, "a", "alice").await;
        let (_b, mut rx_b) = join(&registry, "b", "bob").await;

        let closing = dispatcher.shutdown("Server is shutting down").await;
        assert_eq!(closing, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(next_event(rx)["type"], "system");
            match rx.try_recv() {
                Ok(Outbound::Close { code, .. }) => assert_eq!(code, CLOSE_NORMAL),
                other => panic!("Expected close frame, got {other:?}"),
            }
        }
    }
}
