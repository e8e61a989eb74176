#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use shiftwire_client::testing::{MockConnection, MockServer, MockTransport};
use shiftwire_client::ws::{
    EventHandlers, RealtimeManager, SessionStore, SubscribeOptions, Subscription, VisibilityMonitor,
};
use shiftwire_client::{ChannelMessage, ConnectionState, RealtimeConfig, RealtimeError};
use tokio::sync::mpsc;

pub const TOKEN: &str = "token-1";

pub struct Harness {
    pub manager: RealtimeManager,
    pub server: MockServer,
    pub session: Arc<SessionStore>,
    pub visibility: VisibilityMonitor,
    pub errors: Arc<Mutex<Vec<RealtimeError>>>,
    pub states: Arc<Mutex<Vec<ConnectionState>>>,
}

pub fn start() -> Harness {
    start_with(RealtimeConfig::default(), SessionStore::with_token(TOKEN))
}

pub fn start_with(config: RealtimeConfig, session: SessionStore) -> Harness {
    let (transport, server) = MockTransport::new();
    let session = Arc::new(session);
    let visibility = VisibilityMonitor::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let states = Arc::new(Mutex::new(Vec::new()));

    let handlers = {
        let errors = Arc::clone(&errors);
        let states = Arc::clone(&states);
        EventHandlers::new()
            .on_error(move |e| errors.lock().push(e.clone()))
            .on_connection_change(move |s| states.lock().push(s))
    };

    let manager = RealtimeManager::builder(config)
        .transport(transport)
        .auth_provider(session.clone())
        .visibility(&visibility)
        .event_handlers(handlers)
        .start()
        .expect("manager starts");

    Harness {
        manager,
        server,
        session,
        visibility,
        errors,
        states,
    }
}

impl Harness {
    pub async fn accept(&mut self) -> MockConnection {
        self.server
            .accept_timeout(Duration::from_secs(5))
            .await
            .expect("expected a connection attempt")
    }

    /// Accept, answer the auth frame, and wait for AUTHENTICATED.
    pub async fn accept_authenticated(&mut self, connection_id: &str) -> MockConnection {
        let mut conn = self.accept().await;
        authenticate(&mut conn, connection_id).await;
        wait_for_state(&self.manager, ConnectionState::Authenticated).await;
        conn
    }

    pub fn errors(&self) -> Vec<RealtimeError> {
        self.errors.lock().clone()
    }
}

pub async fn authenticate(conn: &mut MockConnection, connection_id: &str) {
    let auth = conn.recv_json().await.expect("auth frame");
    assert_eq!(auth["type"], "auth");
    conn.send_json(&json!({"type": "auth_success", "connectionId": connection_id}));
}

pub async fn wait_for_state(manager: &RealtimeManager, state: ConnectionState) {
    let mut rx = manager.state_changes();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("manager task alive");
}

/// Subscribe with a handler that forwards every message into a channel.
pub fn collect(
    manager: &RealtimeManager,
    channel: &str,
) -> (Subscription, mpsc::UnboundedReceiver<ChannelMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = manager.subscribe(channel, SubscribeOptions::default(), move |msg| {
        let _ = tx.send(msg.clone());
    });
    (sub, rx)
}

pub fn channel_message(channel: &str, payload: Value) -> Value {
    let mut frame = payload;
    frame["type"] = json!("channel_message");
    frame["channel"] = json!(channel);
    frame
}
