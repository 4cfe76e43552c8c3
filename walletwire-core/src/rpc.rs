//! JSON-RPC 2.0 payload layer.
//!
//! Builds and parses requests and responses, allocates ids, and
//! classifies inbound payloads by structure: a `method` field makes a
//! request, a `result` or `error` field makes a response, anything else
//! is malformed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::session::PeerMeta;

/// The JSON-RPC version carried by every payload.
pub const JSONRPC_VERSION: &str = "2.0";

/// Names of the JSON-RPC methods the connector handles itself.
pub mod methods {
    /// Session handshake request, published on the handshake topic.
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    /// Session state update (also carries kills as `approved: false`).
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    /// Two-phase key rotation offer.
    pub const EXCHANGE_KEY: &str = "wc_exchangeKey";
    /// Transaction signing passthrough.
    pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";
    /// Message signing passthrough.
    pub const ETH_SIGN: &str = "eth_sign";
    /// Typed-data signing passthrough.
    pub const ETH_SIGN_TYPED_DATA: &str = "eth_signTypedData";
}

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate a payload id: milliseconds since the epoch scaled by 1000
/// plus three random decimal digits, forced strictly increasing so ids
/// never collide within a session.
pub fn payload_id() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let entropy: u64 = OsRng.gen_range(0..1000);
    let candidate = millis * 1000 + entropy;

    match LAST_ID.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
        Some(candidate.max(prev + 1))
    }) {
        Ok(prev) => candidate.max(prev + 1),
        Err(_) => candidate,
    }
}

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Payload id, unique within the session.
    pub id: u64,
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Method name; internal methods live in [`methods`].
    pub method: String,
    /// Positional parameters.
    pub params: Value,
}

impl Request {
    /// Build a request with a freshly allocated id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: payload_id(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Build an internal request whose params are the single-element
    /// array convention used by the `wc_*` methods.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportProtocol`] if the params fail to
    /// serialize.
    pub fn internal<P: Serialize>(method: &str, params: &P) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(params).map_err(|_| ProtocolError::TransportProtocol)?;
        Ok(Self::new(method, json!([value])))
    }

    /// Decode the first positional parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportProtocol`] when the first element
    /// is absent or has the wrong shape.
    pub fn first_param<P: DeserializeOwned>(&self) -> Result<P, ProtocolError> {
        let first = self
            .params
            .get(0)
            .cloned()
            .ok_or(ProtocolError::TransportProtocol)?;
        serde_json::from_value(first).map_err(|_| ProtocolError::TransportProtocol)
    }
}

/// Error body of a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// A JSON-RPC response, successful or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request being answered.
    pub id: u64,
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl Response {
    /// Successful response to `id`.
    pub fn result(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response to `id`.
    pub fn error(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Unwrap the `result`, converting an absent one into the carried
    /// error body (or a default "missing result" body).
    ///
    /// # Errors
    ///
    /// Returns the response's [`RpcErrorBody`] when `result` is absent.
    pub fn into_result(self) -> Result<Value, RpcErrorBody> {
        match self.result {
            Some(value) => Ok(value),
            None => Err(self.error.unwrap_or(RpcErrorBody {
                code: -32000,
                message: ProtocolError::MissingResult.to_string(),
            })),
        }
    }
}

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Carries a `method`.
    Request(Request),
    /// Carries a `result` or an `error`.
    Response(Response),
}

impl Payload {
    /// Classify a decrypted JSON value by structure.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportProtocol`] for payloads that are
    /// neither a request nor a response.
    pub fn classify(value: Value) -> Result<Self, ProtocolError> {
        if value.get("method").is_some() {
            serde_json::from_value(value)
                .map(Self::Request)
                .map_err(|_| ProtocolError::TransportProtocol)
        } else if value.get("result").is_some() || value.get("error").is_some() {
            serde_json::from_value(value)
                .map(Self::Response)
                .map_err(|_| ProtocolError::TransportProtocol)
        } else {
            Err(ProtocolError::TransportProtocol)
        }
    }

    /// Payload id.
    pub fn id(&self) -> u64 {
        match self {
            Self::Request(request) => request.id,
            Self::Response(response) => response.id,
        }
    }
}

/// Params of `wc_sessionRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    /// Requester's client id; the topic its responses go to.
    pub peer_id: String,
    /// Requester's descriptive record.
    pub peer_meta: PeerMeta,
    /// Chain the requester wants to operate on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Params of `wc_sessionUpdate` and result shape of the session
/// handshake response. One shape for both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// Whether the session is (still) approved.
    pub approved: bool,
    /// Network identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Ordered account identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<Vec<String>>,
    /// Responder's client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Responder's descriptive record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_meta: Option<PeerMeta>,
    /// Reason attached to rejections and kills.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Params of `wc_exchangeKey`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeKeyParams {
    /// Rotating side's client id.
    pub peer_id: String,
    /// Rotating side's descriptive record.
    pub peer_meta: PeerMeta,
    /// Offered successor key, hex-encoded.
    pub next_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_ids_never_collide() {
        let mut previous = payload_id();
        for _ in 0..1000 {
            let id = payload_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_request_fills_version_and_id() {
        let request = Request::new("eth_sign", json!(["0xabc", "hello"]));
        assert_eq!(request.jsonrpc, JSONRPC_VERSION);
        assert!(request.id > 0);
    }

    #[test]
    fn test_classify_request() {
        let value = json!({"id": 1, "jsonrpc": "2.0", "method": "eth_sign", "params": []});
        match Payload::classify(value).unwrap() {
            Payload::Request(request) => assert_eq!(request.method, "eth_sign"),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_response() {
        let value = json!({"id": 1, "jsonrpc": "2.0", "result": "0xdeadbeef"});
        match Payload::classify(value).unwrap() {
            Payload::Response(response) => {
                assert_eq!(response.into_result().unwrap(), json!("0xdeadbeef"));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_unknown_shape() {
        assert_eq!(
            Payload::classify(json!({"id": 1, "jsonrpc": "2.0"})),
            Err(ProtocolError::TransportProtocol)
        );
    }

    #[test]
    fn test_error_response_rejects_call() {
        let response = Response::error(9, -32000, "denied");
        let err = response.into_result().unwrap_err();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "denied");
    }

    #[test]
    fn test_response_without_result_or_error() {
        let value = json!({"id": 1, "jsonrpc": "2.0", "error": {"code": -1, "message": "no"}});
        let Payload::Response(response) = Payload::classify(value).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.into_result().unwrap_err().code, -1);
    }

    #[test]
    fn test_internal_params_are_single_element_array() {
        let params = ExchangeKeyParams {
            peer_id: "client-1".into(),
            peer_meta: crate::session::PeerMeta {
                name: "w".into(),
                description: String::new(),
                url: String::new(),
                icons: Vec::new(),
            },
            next_key: "11".repeat(32),
        };
        let request = Request::internal(methods::EXCHANGE_KEY, &params).unwrap();
        assert_eq!(request.params.as_array().map(Vec::len), Some(1));
        let decoded: ExchangeKeyParams = request.first_param().unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_first_param_missing_is_malformed() {
        let request = Request::new(methods::SESSION_UPDATE, json!([]));
        assert_eq!(
            request.first_param::<SessionParams>().unwrap_err(),
            ProtocolError::TransportProtocol
        );
    }
}
