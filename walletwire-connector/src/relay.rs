//! Relay WebSocket transport.
//!
//! Frames are JSON text messages `{topic, type: "pub"|"sub", payload}`.
//! The socket is single-shot: no reconnect, no resubscription. Send and
//! receive halves are split so the receive task can run independently
//! of outbound traffic.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use walletwire_core::ProtocolError;

use crate::error::ConnectorError;

/// Direction of a relay frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Publish a payload to a topic.
    Pub,
    /// Subscribe to a topic; payload is empty.
    Sub,
}

/// A relay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Routing topic.
    pub topic: String,
    /// Publish or subscribe.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Serialized envelope on publish frames, empty on subscribe frames.
    pub payload: String,
}

impl Frame {
    /// Publish frame carrying a sealed payload.
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: FrameKind::Pub,
            payload: payload.into(),
        }
    }

    /// Subscribe frame for a topic.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: FrameKind::Sub,
            payload: String::new(),
        }
    }

    /// Serialize to the wire (JSON text).
    pub fn to_wire(&self) -> Result<String, ConnectorError> {
        serde_json::to_string(self).map_err(|_| ProtocolError::TransportProtocol.into())
    }

    /// Parse a frame from the wire.
    ///
    /// # Errors
    ///
    /// Returns `TransportProtocol` on malformed JSON; fatal to the
    /// receive path.
    pub fn from_wire(text: &str) -> Result<Self, ConnectorError> {
        serde_json::from_str(text).map_err(|_| ProtocolError::TransportProtocol.into())
    }
}

/// Rewrite an `http(s)` bridge URL to its `ws(s)` equivalent. Other
/// schemes pass through untouched.
pub fn websocket_url(bridge: &str) -> String {
    if let Some(rest) = bridge.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = bridge.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        bridge.to_string()
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the relay socket.
pub(crate) struct RelaySink {
    tx: SplitSink<Socket, WsMessage>,
}

impl RelaySink {
    /// Send one frame as one WebSocket text message.
    pub(crate) async fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectorError> {
        let wire = frame.to_wire()?;
        self.tx
            .send(WsMessage::Text(wire))
            .await
            .map_err(|e| ConnectorError::WebSocket(e.to_string()))
    }

    /// Best-effort close.
    pub(crate) async fn close(&mut self) {
        let _ = self.tx.close().await;
    }
}

/// Inbound half of the relay socket.
pub(crate) struct RelayStream {
    rx: SplitStream<Socket>,
}

impl RelayStream {
    /// Receive the next frame. `Ok(None)` means the socket closed.
    ///
    /// # Errors
    ///
    /// `TransportProtocol` for malformed frame JSON, `WebSocket` for
    /// socket-level failures.
    pub(crate) async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectorError> {
        loop {
            match self.rx.next().await {
                Some(Ok(WsMessage::Text(text))) => return Frame::from_wire(&text).map(Some),
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue, // Ignore Ping, Pong, Binary
                Some(Err(e)) => return Err(ConnectorError::WebSocket(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

/// Connect to a bridge and split the socket.
pub(crate) async fn open(bridge: &str) -> Result<(RelaySink, RelayStream), ConnectorError> {
    let url = websocket_url(bridge);
    let (socket, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
    let (tx, rx) = socket.split();
    Ok((RelaySink { tx }, RelayStream { rx }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_rewrite() {
        assert_eq!(websocket_url("https://b.example"), "wss://b.example");
        assert_eq!(websocket_url("http://127.0.0.1:8080"), "ws://127.0.0.1:8080");
        assert_eq!(websocket_url("wss://b.example"), "wss://b.example");
        assert_eq!(websocket_url("ws://b.example"), "ws://b.example");
    }

    #[test]
    fn test_frame_wire_roundtrip() {
        let frame = Frame::publish("topic-1", "{\"iv\":\"00\"}");
        let wire = frame.to_wire().unwrap();
        assert_eq!(Frame::from_wire(&wire).unwrap(), frame);
    }

    #[test]
    fn test_frame_wire_field_names() {
        let wire = Frame::subscribe("client-1").to_wire().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["topic"], "client-1");
        assert_eq!(value["type"], "sub");
        assert_eq!(value["payload"], "");
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let err = Frame::from_wire("{nope").unwrap_err();
        assert!(err.is_protocol(ProtocolError::TransportProtocol));
    }
}
