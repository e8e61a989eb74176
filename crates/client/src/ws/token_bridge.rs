//! Access tokens for the realtime socket.
//!
//! The manager fetches a token through [`AuthProvider`] on every connect and
//! listens to its [`AuthEvent`] stream. A token that differs from the one the
//! live connection was opened with triggers a controlled reconnect.
//!
//! [`SessionStore`] is the in-process provider: the host pushes sign-in,
//! refresh and sign-out into it and the store broadcasts them.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

const AUTH_EVENT_CAPACITY: usize = 16;

/// Session data handed out by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Option<String>,
    pub access_token: String,
}

impl AuthSession {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            user_id: None,
            access_token: access_token.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<AuthSession>,
}

impl AuthEvent {
    /// The non-empty access token this event carries, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.access_token.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Supplies access tokens and announces session changes.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    /// Current access token; `None` when signed out.
    async fn access_token(&self) -> Option<String>;

    /// Stream of session changes.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

/// In-memory session holder that broadcasts every change.
#[derive(Debug)]
pub struct SessionStore {
    session: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            session: Mutex::new(None),
            events,
        }
    }

    /// A store that starts signed in, without announcing it.
    pub fn with_token(access_token: impl Into<String>) -> Self {
        let store = Self::new();
        *store.session.lock() = Some(AuthSession::new(access_token));
        store
    }

    pub fn sign_in(&self, session: AuthSession) {
        self.publish(AuthEventKind::SignedIn, Some(session));
    }

    pub fn refresh(&self, access_token: impl Into<String>) {
        let session = {
            let current = self.session.lock();
            AuthSession {
                user_id: current.as_ref().and_then(|s| s.user_id.clone()),
                access_token: access_token.into(),
            }
        };
        self.publish(AuthEventKind::TokenRefreshed, Some(session));
    }

    pub fn sign_out(&self) {
        self.publish(AuthEventKind::SignedOut, None);
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.session.lock().clone()
    }

    fn publish(&self, kind: AuthEventKind, session: Option<AuthSession>) {
        *self.session.lock() = session.clone();
        // No receivers just means nobody is connected yet.
        let _ = self.events.send(AuthEvent { kind, session });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for SessionStore {
    async fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.access_token.clone())
            .filter(|t| !t.is_empty())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// The token the live connection uses and the last one observed from the
/// auth layer. Updated as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TokenBundle {
    current: Option<String>,
    last_seen: Option<String>,
}

impl TokenBundle {
    /// Record the token a newly opened socket authenticated with.
    pub(crate) fn observe(&mut self, token: &str) {
        self.current = Some(token.to_string());
        self.last_seen = Some(token.to_string());
    }

    /// The new token if `event` rotates away from the last one seen.
    pub(crate) fn rotation(&self, event: &AuthEvent) -> Option<String> {
        let token = event.access_token()?;
        if self.last_seen.as_deref() == Some(token) {
            return None;
        }
        Some(token.to_string())
    }

    /// Replace both fields with the rotated token.
    pub(crate) fn replace(&mut self, token: String) {
        *self = Self {
            current: Some(token.clone()),
            last_seen: Some(token),
        };
    }
}
