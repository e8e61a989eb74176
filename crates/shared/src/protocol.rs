//! Realtime wire protocol.
//!
//! Every frame is a JSON text message with a `type` discriminator. The
//! client authenticates in-band with `auth`, keeps the socket warm with
//! `ping`, and multiplexes application traffic as `channel_message`
//! frames. Unknown server types are tolerated so the server can add kinds
//! without breaking older clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RealtimeError;

/// Normal closure; never retried.
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when a peer closes without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Abnormal closure (socket error or stream ended without a close frame).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Paused because the application was hidden.
pub const CLOSE_PAUSED: u16 = 4000;
/// Closed to reconnect with a rotated access token.
pub const CLOSE_TOKEN_ROTATED: u16 = 4001;
/// Server rejected the access token.
pub const CLOSE_AUTH_REJECTED: u16 = 4002;

/// First entry of the `Sec-WebSocket-Protocol` list; the token follows it.
pub const JWT_SUBPROTOCOL: &str = "jwt";

/// Channel assigned to inbound channel messages that do not name one.
pub const DEFAULT_CHANNEL: &str = "default";

/// Keys owned by the envelope; stripped from application payloads.
const RESERVED_KEYS: [&str; 2] = ["type", "channel"];

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
    },
    Ping,
    ChannelMessage {
        channel: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

impl ClientMessage {
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            token: token.into(),
        }
    }

    /// Wrap an application payload for `channel`. Payload keys that collide
    /// with the envelope are dropped so they cannot reroute the frame.
    pub fn channel_message(channel: impl Into<String>, mut payload: Map<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            payload.remove(key);
        }
        Self::ChannelMessage {
            channel: channel.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    Pong,
    Error {
        #[serde(default)]
        message: String,
    },
    ChannelMessage {
        #[serde(default)]
        channel: Option<String>,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// A `type` this client does not understand.
    #[serde(skip)]
    Unknown { kind: String },
}

impl ServerMessage {
    /// Parse a text frame.
    ///
    /// Malformed JSON, a missing `type`, or a known type with the wrong shape
    /// is a protocol error. An unrecognized `type` parses to
    /// [`ServerMessage::Unknown`].
    pub fn parse(raw: &str) -> Result<Self, RealtimeError> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_owned(),
            None => {
                return Err(RealtimeError::Protocol(
                    "frame has no string `type` field".to_string(),
                ))
            }
        };

        match kind.as_str() {
            "auth_success" | "pong" | "error" | "channel_message" => {
                Ok(serde_json::from_value(value)?)
            }
            _ => Ok(Self::Unknown { kind }),
        }
    }
}

/// An inbound application message, delivered to channel handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ChannelMessage {
    /// Build a message, falling back to [`DEFAULT_CHANNEL`] when the server
    /// did not name a channel.
    pub fn new(channel: Option<String>, payload: Map<String, Value>) -> Self {
        Self {
            channel: channel.unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            payload,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Deserialize the payload into an application type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| RealtimeError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn auth_frame_shape() {
        let text = ClientMessage::auth("abc").to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "auth", "token": "abc"}));
    }

    #[test]
    fn ping_frame_shape() {
        let text = ClientMessage::Ping.to_json().unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn channel_message_flattens_payload_and_strips_envelope_keys() {
        let payload = object(json!({"text": "hi", "type": "evil", "channel": "other"}));
        let text = ClientMessage::channel_message("chat", payload)
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "channel_message", "channel": "chat", "text": "hi"})
        );
    }

    #[test]
    fn parses_auth_success() {
        let msg = ServerMessage::parse(r#"{"type":"auth_success","connectionId":"c-1"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::AuthSuccess {
                connection_id: "c-1".into()
            }
        );
    }

    #[test]
    fn parses_channel_message_with_and_without_channel() {
        let msg = ServerMessage::parse(r#"{"type":"channel_message","channel":"chat","text":"hi"}"#)
            .unwrap();
        match msg {
            ServerMessage::ChannelMessage { channel, payload } => {
                let message = ChannelMessage::new(channel, payload);
                assert_eq!(message.channel, "chat");
                assert_eq!(message.get_str("text"), Some("hi"));
                assert!(message.get("type").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg = ServerMessage::parse(r#"{"type":"channel_message","n":1}"#).unwrap();
        match msg {
            ServerMessage::ChannelMessage { channel, payload } => {
                let message = ChannelMessage::new(channel, payload);
                assert_eq!(message.channel, DEFAULT_CHANNEL);
                assert_eq!(message.get("n"), Some(&json!(1)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_without_message_defaults_to_empty() {
        let msg = ServerMessage::parse(r#"{"type":"error"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: String::new()
            }
        );
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg = ServerMessage::parse(r#"{"type":"presence_diff","joins":[]}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Unknown {
                kind: "presence_diff".into()
            }
        );
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(
            ServerMessage::parse("not json"),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"kind":"pong"}"#),
            Err(RealtimeError::Protocol(_))
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"auth_success"}"#),
            Err(RealtimeError::Protocol(_))
        ));
    }

    #[test]
    fn decode_payload_into_typed_struct() {
        #[derive(Deserialize)]
        struct Shift {
            id: u32,
        }

        let message = ChannelMessage::new(Some("shifts".into()), object(json!({"id": 7})));
        let shift: Shift = message.decode().unwrap();
        assert_eq!(shift.id, 7);
        assert!(matches!(
            message.decode::<Vec<u8>>(),
            Err(RealtimeError::InvalidPayload(_))
        ));
    }
}
