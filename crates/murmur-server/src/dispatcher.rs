//! Broadcast dispatcher: turns inbound events into registry updates and
//! outbound deliveries.
//!
//! Every handler runs to completion without awaiting. The only deferred work
//! is the welcome notice, which runs on a tracked task so a slow upstream
//! never holds up events from other connections.

use std::sync::Arc;

use metrics::counter;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::metrics::{RELAY_EVENTS_TOTAL, RELAY_WELCOME_FAILURES_TOTAL};
use crate::protocol::{ChatPayload, ConnectionId, InboundEvent, OutboundEvent};
use crate::registry::SessionRegistry;
use crate::welcome::{WELCOME_FALLBACK, WelcomeSource};
use crate::websocket::broadcast::ConnectionSet;

/// Name shown for typing events from connections that have not claimed one.
pub const ANONYMOUS: &str = "Anonymous";

/// Sent to an anonymous connection that tries to chat.
pub const CLAIM_REQUIRED: &str = "Please set a username before sending messages.";

/// Notice sent to the other connections when `name` joins.
pub fn joined_notice(name: &str) -> String {
    format!("{name} has joined the chat!")
}

/// Notice sent to the remaining connections when `name` leaves.
pub fn left_notice(name: &str) -> String {
    format!("{name} has left the chat.")
}

/// Routes events between the session registry and the connection set.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    connections: Arc<dyn ConnectionSet>,
    welcome: Arc<dyn WelcomeSource>,
    pending: TaskTracker,
}

impl Dispatcher {
    /// Create a dispatcher over the given collaborators.
    pub fn new(
        registry: Arc<SessionRegistry>,
        connections: Arc<dyn ConnectionSet>,
        welcome: Arc<dyn WelcomeSource>,
    ) -> Self {
        Self {
            registry,
            connections,
            welcome,
            pending: TaskTracker::new(),
        }
    }

    /// The session registry this dispatcher mutates.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Number of welcome notices still in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Handle one event from `conn`.
    ///
    /// Must be called from within a Tokio runtime: claiming a name spawns
    /// the welcome task.
    pub fn dispatch(&self, conn: &ConnectionId, event: InboundEvent) {
        counter!(RELAY_EVENTS_TOTAL, "event" => event.name()).increment(1);
        debug!(conn_id = %conn, event = event.name(), "dispatching event");

        match event {
            InboundEvent::SetUsername(name) => self.claim(conn, name),
            InboundEvent::Typing => {
                let name = self.resolve_name(conn);
                self.connections
                    .send_except(conn, &OutboundEvent::UserTyping(name));
            }
            InboundEvent::StopTyping => {
                let name = self.resolve_name(conn);
                self.connections
                    .send_except(conn, &OutboundEvent::UserStoppedTyping(name));
            }
            InboundEvent::ChatMessage(text) => self.chat(conn, text),
            InboundEvent::Disconnect => self.disconnect(conn),
        }
    }

    /// Wait for every in-flight welcome notice to settle.
    pub async fn drain(&self) {
        let _ = self.pending.close();
        self.pending.wait().await;
        let _ = self.pending.reopen();
    }

    /// Register the name, announce the join, and broadcast the new user list.
    ///
    /// Not serialized against other handlers: lists from concurrent changes
    /// can arrive out of order, and the next change broadcasts a fresh one.
    fn claim(&self, conn: &ConnectionId, name: String) {
        self.registry.set(conn, name.clone());
        info!(conn_id = %conn, username = %name, "username claimed");

        self.connections
            .send_except(conn, &OutboundEvent::SystemMessage(joined_notice(&name)));

        let welcome = Arc::clone(&self.welcome);
        let connections = Arc::clone(&self.connections);
        let target = conn.clone();
        let _ = self.pending.spawn(async move {
            let text = match welcome.fetch().await {
                Ok(text) => text,
                Err(e) => {
                    counter!(RELAY_WELCOME_FAILURES_TOTAL).increment(1);
                    warn!(conn_id = %target, error = %e, "welcome fetch failed, sending fallback");
                    WELCOME_FALLBACK.to_string()
                }
            };
            connections.send_to(&target, &OutboundEvent::SystemMessage(text));
        });

        self.connections
            .send_all(&OutboundEvent::UserList(self.registry.names()));
    }

    fn chat(&self, conn: &ConnectionId, text: String) {
        match self.registry.get(conn) {
            Some(user) => {
                debug!(conn_id = %conn, username = %user, len = text.len(), "chat message");
                self.connections
                    .send_all(&OutboundEvent::ChatMessage(ChatPayload { user, msg: text }));
            }
            None => {
                debug!(conn_id = %conn, "chat message from anonymous connection rejected");
                self.connections.send_to(
                    conn,
                    &OutboundEvent::SystemMessage(CLAIM_REQUIRED.to_string()),
                );
            }
        }
    }

    /// Same ordering caveat as `claim` for the user list it sends.
    fn disconnect(&self, conn: &ConnectionId) {
        let Some(name) = self.registry.remove(conn) else {
            info!(conn_id = %conn, "anonymous connection disconnected");
            return;
        };
        info!(conn_id = %conn, username = %name, "user disconnected");
        self.connections
            .send_except(conn, &OutboundEvent::SystemMessage(left_notice(&name)));
        self.connections
            .send_all(&OutboundEvent::UserList(self.registry.names()));
    }

    fn resolve_name(&self, conn: &ConnectionId) -> String {
        self.registry
            .get(conn)
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::welcome::{SimulatedWelcome, WelcomeError};

    const WELCOME: &str = "Welcome to the Simple WebSocket Chat!";

    /// Records deliveries per connection instead of writing to sockets.
    #[derive(Default)]
    struct RecordingConnections {
        connected: Mutex<Vec<ConnectionId>>,
        inbox: Mutex<Vec<(ConnectionId, OutboundEvent)>>,
    }

    impl RecordingConnections {
        fn connect(&self, id: &str) -> ConnectionId {
            let id = ConnectionId::from(id);
            self.connected.lock().push(id.clone());
            id
        }

        fn drop_connection(&self, id: &ConnectionId) {
            self.connected.lock().retain(|c| c != id);
        }

        fn received(&self, id: &ConnectionId) -> Vec<OutboundEvent> {
            self.inbox
                .lock()
                .iter()
                .filter(|(to, _)| to == id)
                .map(|(_, ev)| ev.clone())
                .collect()
        }

        fn total(&self) -> usize {
            self.inbox.lock().len()
        }

        fn clear(&self) {
            self.inbox.lock().clear();
        }

        fn push_to(&self, targets: Vec<ConnectionId>, event: &OutboundEvent) {
            let mut inbox = self.inbox.lock();
            for t in targets {
                inbox.push((t, event.clone()));
            }
        }
    }

    impl ConnectionSet for RecordingConnections {
        fn send_to(&self, id: &ConnectionId, event: &OutboundEvent) {
            let present = self.connected.lock().contains(id);
            if present {
                self.push_to(vec![id.clone()], event);
            }
        }

        fn send_except(&self, excluded: &ConnectionId, event: &OutboundEvent) {
            let targets = self
                .connected
                .lock()
                .iter()
                .filter(|c| *c != excluded)
                .cloned()
                .collect();
            self.push_to(targets, event);
        }

        fn send_all(&self, event: &OutboundEvent) {
            let targets = self.connected.lock().clone();
            self.push_to(targets, event);
        }
    }

    struct FailingWelcome;

    #[async_trait]
    impl WelcomeSource for FailingWelcome {
        async fn fetch(&self) -> Result<String, WelcomeError> {
            Err(WelcomeError::Unavailable("upstream down".into()))
        }
    }

    fn setup_with(welcome: Arc<dyn WelcomeSource>) -> (Dispatcher, Arc<RecordingConnections>) {
        let conns = Arc::new(RecordingConnections::default());
        let dispatcher = Dispatcher::new(
            Arc::new(SessionRegistry::new()),
            Arc::clone(&conns) as Arc<dyn ConnectionSet>,
            welcome,
        );
        (dispatcher, conns)
    }

    fn setup() -> (Dispatcher, Arc<RecordingConnections>) {
        setup_with(Arc::new(SimulatedWelcome::new(
            Duration::from_millis(1500),
            WELCOME,
        )))
    }

    fn system(text: &str) -> OutboundEvent {
        OutboundEvent::SystemMessage(text.into())
    }

    fn user_list(names: &[&str]) -> OutboundEvent {
        OutboundEvent::UserList(names.iter().map(|n| (*n).to_string()).collect())
    }

    #[tokio::test]
    async fn anonymous_chat_gets_private_notice() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::ChatMessage("hello?".into()));

        assert_eq!(conns.received(&a), vec![system(CLAIM_REQUIRED)]);
        assert!(conns.received(&b).is_empty());
        assert_eq!(conns.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_registers_name() {
        let (d, conns) = setup();
        let a = conns.connect("a");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));

        assert_eq!(d.registry().names(), vec!["alice"]);
        d.dispatch(&a, InboundEvent::Disconnect);
        assert!(d.registry().names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_notifies_others_and_welcomes_sender() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));

        // Join notice and user list go out immediately; the welcome waits.
        assert_eq!(
            conns.received(&b),
            vec![system("alice has joined the chat!"), user_list(&["alice"])]
        );
        assert_eq!(conns.received(&a), vec![user_list(&["alice"])]);
        assert_eq!(d.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(1600)).await;

        assert_eq!(
            conns.received(&a),
            vec![user_list(&["alice"]), system(WELCOME)]
        );
        assert_eq!(conns.received(&b).len(), 2);
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_claims_each_see_the_other_join_once() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.dispatch(&b, InboundEvent::SetUsername("bob".into()));
        d.drain().await;

        let to_a = conns.received(&a);
        let to_b = conns.received(&b);

        let joined = |evs: &[OutboundEvent], text: &str| {
            evs.iter().filter(|e| **e == system(text)).count()
        };
        assert_eq!(joined(&to_b, "alice has joined the chat!"), 1);
        assert_eq!(joined(&to_a, "bob has joined the chat!"), 1);
        assert_eq!(joined(&to_a, "alice has joined the chat!"), 0);
        assert_eq!(joined(&to_b, "bob has joined the chat!"), 0);
        assert_eq!(joined(&to_a, WELCOME), 1);
        assert_eq!(joined(&to_b, WELCOME), 1);
        assert!(to_b.contains(&user_list(&["alice", "bob"])));
    }

    #[tokio::test]
    async fn welcome_failure_sends_fallback_to_sender_only() {
        let (d, conns) = setup_with(Arc::new(FailingWelcome));
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.drain().await;

        assert!(conns.received(&a).contains(&system(WELCOME_FALLBACK)));
        assert!(!conns.received(&b).contains(&system(WELCOME_FALLBACK)));
    }

    #[tokio::test(start_paused = true)]
    async fn welcome_dropped_when_sender_left() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        conns.drop_connection(&a);
        d.dispatch(&a, InboundEvent::Disconnect);
        conns.clear();

        d.drain().await;

        assert!(conns.received(&a).is_empty());
        assert!(!conns.received(&b).contains(&system(WELCOME)));
    }

    #[tokio::test(start_paused = true)]
    async fn chat_from_identified_reaches_everyone() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");
        let c = conns.connect("c");
        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.drain().await;
        conns.clear();

        d.dispatch(&a, InboundEvent::ChatMessage("hi all".into()));

        let expected = OutboundEvent::ChatMessage(ChatPayload {
            user: "alice".into(),
            msg: "hi all".into(),
        });
        for id in [&a, &b, &c] {
            assert_eq!(conns.received(id), vec![expected.clone()]);
        }
    }

    #[tokio::test]
    async fn typing_from_anonymous_uses_placeholder() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::Typing);
        d.dispatch(&a, InboundEvent::StopTyping);

        assert!(conns.received(&a).is_empty());
        assert_eq!(
            conns.received(&b),
            vec![
                OutboundEvent::UserTyping(ANONYMOUS.into()),
                OutboundEvent::UserStoppedTyping(ANONYMOUS.into()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_from_identified_uses_name() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");
        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        conns.clear();

        d.dispatch(&a, InboundEvent::Typing);

        assert_eq!(
            conns.received(&b),
            vec![OutboundEvent::UserTyping("alice".into())]
        );
        assert!(conns.received(&a).is_empty());
    }

    #[tokio::test]
    async fn anonymous_disconnect_is_silent() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        conns.drop_connection(&a);
        d.dispatch(&a, InboundEvent::Disconnect);

        assert!(conns.received(&b).is_empty());
        assert_eq!(conns.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn identified_disconnect_notifies_remaining_once() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");
        let c = conns.connect("c");
        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.dispatch(&b, InboundEvent::SetUsername("bob".into()));
        d.drain().await;
        conns.clear();

        conns.drop_connection(&a);
        d.dispatch(&a, InboundEvent::Disconnect);
        d.dispatch(&a, InboundEvent::Disconnect);

        for id in [&b, &c] {
            assert_eq!(
                conns.received(id),
                vec![system("alice has left the chat."), user_list(&["bob"])]
            );
        }
        assert!(conns.received(&a).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_settle_on_next_list_change() {
        let (d, conns) = setup();
        let d = Arc::new(d);
        let ids: Vec<_> = (0..8).map(|i| conns.connect(&format!("c{i}"))).collect();

        let claims: Vec<_> = ids
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, id)| {
                let d = Arc::clone(&d);
                tokio::spawn(async move {
                    d.dispatch(&id, InboundEvent::SetUsername(format!("user{i}")));
                })
            })
            .collect();
        for claim in claims {
            claim.await.unwrap();
        }

        conns.drop_connection(&ids[0]);
        d.dispatch(&ids[0], InboundEvent::Disconnect);

        let expected = OutboundEvent::UserList(d.registry().names());
        assert_eq!(d.registry().len(), 7);
        for id in &ids[1..] {
            let last_list = conns
                .received(id)
                .into_iter()
                .rev()
                .find(|ev| matches!(ev, OutboundEvent::UserList(_)));
            assert_eq!(last_list.as_ref(), Some(&expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_names_are_listed_twice() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("sam".into()));
        d.dispatch(&b, InboundEvent::SetUsername("sam".into()));

        assert_eq!(d.registry().names(), vec!["sam", "sam"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_overwrites_and_announces_again() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.dispatch(&a, InboundEvent::SetUsername("alicia".into()));

        assert_eq!(d.registry().names(), vec!["alicia"]);
        assert!(conns.received(&b).contains(&system("alicia has joined the chat!")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_welcome_does_not_block_other_events() {
        let (d, conns) = setup();
        let a = conns.connect("a");
        let b = conns.connect("b");

        d.dispatch(&a, InboundEvent::SetUsername("alice".into()));
        d.dispatch(&b, InboundEvent::ChatMessage("still here".into()));

        // b's rejection lands before any time passes.
        assert!(conns.received(&b).contains(&system(CLAIM_REQUIRED)));
        assert!(!conns.received(&a).contains(&system(WELCOME)));
    }
}
