//! Native WebSocket transport using tokio-tungstenite.

use futures_util::{future, SinkExt, StreamExt};
use shiftwire_shared::RealtimeError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungsteniteCloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

use super::{CloseFrame, ConnectFuture, ConnectRequest, Socket, WsFrame, WsTransport};

/// Opens real sockets over TCP/TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl WsTransport for TungsteniteTransport {
    fn connect(&self, request: ConnectRequest) -> ConnectFuture {
        Box::pin(async move {
            let mut http_request = request
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| RealtimeError::InvalidUrl {
                    url: request.url.clone(),
                    reason: e.to_string(),
                })?;

            if !request.protocols.is_empty() {
                let protocols = HeaderValue::from_str(&request.protocols.join(", "))
                    .map_err(|e| RealtimeError::Protocol(format!("bad subprotocol list: {e}")))?;
                http_request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", protocols);
            }

            let (ws_stream, _response) = connect_async(http_request)
                .await
                .map_err(|e| RealtimeError::Network(format!("WebSocket handshake failed: {e}")))?;
            crate::log_debug!("WebSocket handshake with {} complete", request.url);

            let (write, read) = ws_stream.split();
            let reader = read.map(|message| {
                message
                    .map(frame_from_message)
                    .map_err(|e| RealtimeError::Network(e.to_string()))
            });
            let writer = write
                .with(|frame: WsFrame| future::ready(Ok::<_, tungstenite::Error>(message_from_frame(frame))))
                .sink_map_err(|e| RealtimeError::Network(e.to_string()));

            Ok(Socket::new(reader, writer))
        })
    }
}

fn frame_from_message(message: Message) -> WsFrame {
    match message {
        Message::Text(text) => WsFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => WsFrame::Binary(data.to_vec()),
        Message::Ping(data) => WsFrame::Ping(data.to_vec()),
        Message::Pong(data) => WsFrame::Pong(data.to_vec()),
        Message::Close(frame) => WsFrame::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        })),
        // Raw frames only surface when writing; treat a stray one as binary.
        Message::Frame(frame) => WsFrame::Binary(frame.into_payload().to_vec()),
    }
}

fn message_from_frame(frame: WsFrame) -> Message {
    match frame {
        WsFrame::Text(text) => Message::Text(text.into()),
        WsFrame::Binary(data) => Message::Binary(data.into()),
        WsFrame::Ping(data) => Message::Ping(data.into()),
        WsFrame::Pong(data) => Message::Pong(data.into()),
        WsFrame::Close(frame) => Message::Close(frame.map(|f| TungsteniteCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.into(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frames_keep_code_and_reason() {
        let message = message_from_frame(WsFrame::close(4001, "token rotated"));
        assert_eq!(frame_from_message(message), WsFrame::close(4001, "token rotated"));
    }

    #[test]
    fn text_frames_convert_both_ways() {
        let message = message_from_frame(WsFrame::Text("{\"type\":\"ping\"}".into()));
        assert!(matches!(&message, Message::Text(t) if t.as_str() == "{\"type\":\"ping\"}"));
        assert_eq!(
            frame_from_message(message),
            WsFrame::Text("{\"type\":\"ping\"}".into())
        );
    }
}
