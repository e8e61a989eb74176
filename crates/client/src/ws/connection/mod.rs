//! Socket-level types and the transport seam.
//!
//! The manager never touches a concrete WebSocket library. It asks a
//! [`WsTransport`] for a [`Socket`], a boxed frame stream plus a boxed frame
//! sink, so tests can swap in an in-memory transport.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};
use shiftwire_shared::{RealtimeError, JWT_SUBPROTOCOL};

mod connection_native;

pub use connection_native::TungsteniteTransport;

/// Connection state for the shared realtime socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, `auth` sent, waiting for `auth_success`.
    Connected,
    Authenticated,
    Error,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Authenticated => "AUTHENTICATED",
            ConnectionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// A WebSocket frame, independent of the transport library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl WsFrame {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        WsFrame::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))
    }
}

/// What the manager asks the transport to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Offered subprotocols, sent as `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
}

impl ConnectRequest {
    /// Offer `["jwt", token]`; the server reads the token from the second entry.
    pub fn with_token(url: impl Into<String>, token: &str) -> Self {
        Self {
            url: url.into(),
            protocols: vec![JWT_SUBPROTOCOL.to_string(), token.to_string()],
        }
    }

    /// The token carried in the subprotocol list, if any.
    pub fn token(&self) -> Option<&str> {
        match self.protocols.as_slice() {
            [first, token, ..] if first == JWT_SUBPROTOCOL => Some(token.as_str()),
            _ => None,
        }
    }
}

pub type FrameReader = Pin<Box<dyn Stream<Item = Result<WsFrame, RealtimeError>> + Send>>;
pub type FrameWriter = Pin<Box<dyn Sink<WsFrame, Error = RealtimeError> + Send>>;

/// An open socket: inbound frames and an outbound frame sink.
pub struct Socket {
    pub(crate) reader: FrameReader,
    pub(crate) writer: FrameWriter,
}

impl Socket {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Stream<Item = Result<WsFrame, RealtimeError>> + Send + 'static,
        W: Sink<WsFrame, Error = RealtimeError> + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            writer: Box::pin(writer),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Socket, RealtimeError>> + Send>>;

/// Opens sockets for the manager.
pub trait WsTransport: Send + Sync + 'static {
    fn connect(&self, request: ConnectRequest) -> ConnectFuture;
}
