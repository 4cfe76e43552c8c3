//! Connector errors.

use std::fmt;

use walletwire_core::rpc::RpcErrorBody;
use walletwire_core::ProtocolError;

/// Errors surfaced by connector operations.
#[derive(Debug)]
pub enum ConnectorError {
    /// Protocol-level failure from `walletwire-core`.
    Protocol(ProtocolError),

    /// The peer answered a call with a JSON-RPC error (or no result).
    Rpc {
        /// Numeric error code from the response.
        code: i64,
        /// Message from the response.
        message: String,
    },

    /// Failed to establish the relay WebSocket connection.
    ConnectionFailed(String),

    /// WebSocket-level error while sending or receiving.
    WebSocket(String),

    /// The relay socket closed; the connector is single-shot.
    SocketClosed,

    /// The pre-connect send queue is full.
    QueueFull,

    /// An outbound call hit its deadline without a response.
    Timeout,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            Self::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            Self::WebSocket(msg) => write!(f, "websocket error: {}", msg),
            Self::SocketClosed => write!(f, "relay socket closed"),
            Self::QueueFull => write!(f, "send queue full"),
            Self::Timeout => write!(f, "call timed out"),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<ProtocolError> for ConnectorError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<RpcErrorBody> for ConnectorError {
    fn from(body: RpcErrorBody) -> Self {
        Self::Rpc {
            code: body.code,
            message: body.message,
        }
    }
}

impl ConnectorError {
    /// Whether this is a specific protocol failure.
    pub fn is_protocol(&self, kind: ProtocolError) -> bool {
        matches!(self, Self::Protocol(e) if *e == kind)
    }
}
