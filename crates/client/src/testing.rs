//! In-memory transport for driving the realtime manager without a network.
//!
//! [`MockTransport::new`] returns the transport for the manager plus a
//! [`MockServer`] that accepts each connection attempt as a
//! [`MockConnection`]. Tests read what the client wrote, push server frames,
//! close with a code, or drop the socket outright.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc as frames;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use shiftwire_shared::RealtimeError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::ws::{ConnectFuture, ConnectRequest, Socket, WsFrame, WsTransport};

/// How the mock answers the next connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Accept,
    /// Fail the handshake with a network error.
    Refuse,
    /// Never complete the handshake.
    Hang,
}

struct TransportState {
    behavior: Mutex<ConnectBehavior>,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<MockConnection>,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServer) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let state = Arc::new(TransportState {
            behavior: Mutex::new(ConnectBehavior::Accept),
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
            accepted,
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            MockServer { state, incoming },
        )
    }
}

impl WsTransport for MockTransport {
    fn connect(&self, request: ConnectRequest) -> ConnectFuture {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            state.attempts.fetch_add(1, Ordering::SeqCst);
            state.attempt_times.lock().push(Instant::now());
            let behavior = *state.behavior.lock();
            match behavior {
                ConnectBehavior::Accept => {}
                ConnectBehavior::Refuse => {
                    return Err(RealtimeError::Network("connection refused".to_string()))
                }
                ConnectBehavior::Hang => std::future::pending::<()>().await,
            }

            let (client_tx, client_rx) = frames::unbounded::<WsFrame>();
            let (server_tx, server_rx) = frames::unbounded::<WsFrame>();
            let connection = MockConnection {
                request,
                from_client: client_rx,
                to_client: Some(server_tx),
            };
            state
                .accepted
                .send(connection)
                .map_err(|_| RealtimeError::Network("mock server is gone".to_string()))?;

            let reader = server_rx.map(Ok::<WsFrame, RealtimeError>);
            let writer = client_tx
                .sink_map_err(|_| RealtimeError::Network("mock peer closed the socket".to_string()));
            Ok(Socket::new(reader, writer))
        })
    }
}

/// Test-side control of a [`MockTransport`].
pub struct MockServer {
    state: Arc<TransportState>,
    incoming: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.state.behavior.lock() = behavior;
    }

    /// Connection attempts seen so far, whatever their outcome.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// When each connection attempt reached the transport, in order.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.attempt_times.lock().clone()
    }

    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MockConnection> {
        self.incoming.recv().await
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.incoming.recv())
            .await
            .unwrap_or_default()
    }
}

/// Server end of one accepted socket.
pub struct MockConnection {
    pub request: ConnectRequest,
    from_client: frames::UnboundedReceiver<WsFrame>,
    to_client: Option<frames::UnboundedSender<WsFrame>>,
}

impl MockConnection {
    /// Next frame the client wrote; `None` once the client dropped the socket.
    pub async fn recv(&mut self) -> Option<WsFrame> {
        self.from_client.next().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.from_client.next())
            .await
            .unwrap_or_default()
    }

    /// Next text frame, parsed as JSON. Other frame kinds are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.recv().await? {
                WsFrame::Text(text) => return serde_json::from_str(&text).ok(),
                _ => continue,
            }
        }
    }

    /// Next close frame's code, skipping anything else the client wrote.
    pub async fn recv_close(&mut self) -> Option<u16> {
        loop {
            if let WsFrame::Close(frame) = self.recv().await? {
                return frame.map(|f| f.code);
            }
        }
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(WsFrame::Text(text.into()));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(value.to_string());
    }

    /// Send a close frame and end the stream, as a server closing would.
    pub fn close(&mut self, code: u16, reason: &str) {
        self.push(WsFrame::close(code, reason));
        self.to_client = None;
    }

    /// End the stream without a close frame.
    pub fn drop_socket(&mut self) {
        self.to_client = None;
    }

    fn push(&self, frame: WsFrame) {
        if let Some(tx) = &self.to_client {
            let _ = tx.unbounded_send(frame);
        }
    }
}
