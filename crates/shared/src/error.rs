//! Error taxonomy for the realtime connection.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the realtime client.
///
/// Connection-level failures (`ConnectionTimeout`, `Network`) feed the
/// reconnect policy. `AuthUnavailable` and `AuthRejected` are terminal for
/// the current cycle. The remaining variants are logged and reported to the
/// error callback without touching connection state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("connection attempt timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("no access token available")]
    AuthUnavailable,

    #[error("server rejected authentication: {0}")]
    AuthRejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("handler for channel '{channel}' failed: {message}")]
    ChannelHandler { channel: String, message: String },

    #[error("invalid realtime url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("outbound queue full ({capacity} messages); dropped a message for channel '{channel}'")]
    QueueOverflow { channel: String, capacity: usize },

    #[error("realtime manager has shut down")]
    Closed,
}

impl RealtimeError {
    /// Whether the reconnect policy may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConnectionTimeout(_) | Self::Network(_))
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_recoverable() {
        assert!(RealtimeError::ConnectionTimeout(Duration::from_secs(10)).is_recoverable());
        assert!(RealtimeError::Network("reset".into()).is_recoverable());
        assert!(!RealtimeError::AuthUnavailable.is_recoverable());
        assert!(!RealtimeError::AuthRejected("expired".into()).is_recoverable());
        assert!(!RealtimeError::Closed.is_recoverable());
    }

    #[test]
    fn timeout_message_reports_milliseconds() {
        let err = RealtimeError::ConnectionTimeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "connection attempt timed out after 10000ms");
    }

    #[test]
    fn queue_overflow_names_channel_and_capacity() {
        let err = RealtimeError::QueueOverflow {
            channel: "chat".into(),
            capacity: 2,
        };
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "outbound queue full (2 messages); dropped a message for channel 'chat'"
        );
    }
}
