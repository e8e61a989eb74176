//! Lifecycle callbacks for hosts that want to observe the connection.
//!
//! ```rust,no_run
//! use shiftwire_client::ws::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connection_change(|state| println!("realtime: {state}"))
//!     .on_error(|error| eprintln!("realtime error: {error}"));
//! ```
//!
//! Callbacks run on the connection task and should return quickly.

use std::fmt;
use std::sync::Arc;

use shiftwire_shared::RealtimeError;

use super::connection::ConnectionState;

/// Why the socket closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub code: u16,
    pub reason: String,
}

impl DisconnectReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "{} (code {})", self.reason, self.code)
        }
    }
}

pub type OnConnectionChange = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type OnError = Arc<dyn Fn(&RealtimeError) + Send + Sync>;
pub type OnDisconnect = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
/// Receives the server-assigned connection id.
pub type OnAuthenticated = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventHandlers {
    on_connection_change: Option<OnConnectionChange>,
    on_error: Option<OnError>,
    on_disconnect: Option<OnDisconnect>,
    on_authenticated: Option<OnAuthenticated>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connection_change", &self.on_connection_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_authenticated", &self.on_authenticated.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every state transition.
    pub fn on_connection_change(
        mut self,
        f: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_change = Some(Arc::new(f));
        self
    }

    /// Called for connection failures, server-reported errors and failing
    /// channel handlers. See [`RealtimeError::is_recoverable`].
    pub fn on_error(mut self, f: impl Fn(&RealtimeError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn(&DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn on_authenticated(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_authenticated = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connection_change(&self, state: ConnectionState) {
        if let Some(cb) = &self.on_connection_change {
            cb(state);
        }
    }

    pub(crate) fn emit_error(&self, error: &RealtimeError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: &DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_authenticated(&self, connection_id: &str) {
        if let Some(cb) = &self.on_authenticated {
            cb(connection_id);
        }
    }
}
