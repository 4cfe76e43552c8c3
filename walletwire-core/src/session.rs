//! Session snapshot model.
//!
//! The [`Session`] is the serializable unit: everything a process needs
//! to resume a connection after a restart. Transient state (staged next
//! key, send queue, listener table, in-flight correlators) deliberately
//! lives outside of it.
//!
//! Exactly one of three shapes holds at any time:
//! fresh (no handshake), pending (handshake topic known, not approved),
//! connected (peer known and session approved).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::SessionKey;

/// Descriptive record identifying one end of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMeta {
    /// Human-readable application name.
    pub name: String,
    /// Short application description.
    pub description: String,
    /// Application URL.
    pub url: String,
    /// Icon URLs, largest first.
    pub icons: Vec<String>,
}

/// Chain and account state carried by approvals and session updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Network identifier.
    pub chain_id: u64,
    /// Ordered account identifiers.
    pub accounts: Vec<String>,
}

/// The durable session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Whether the session has been approved by the peer.
    pub connected: bool,

    /// Relay URL.
    pub bridge: String,

    /// Current symmetric key, hex at this boundary. A snapshot is never
    /// persisted while this is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<SessionKey>,

    /// Our identifier; doubles as our relay topic.
    pub client_id: String,

    /// Peer identifier; doubles as the peer's relay topic once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Our descriptive record. Resolved at construction, immutable after.
    pub client_meta: PeerMeta,

    /// Peer's descriptive record, learned during the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_meta: Option<PeerMeta>,

    /// JSON-RPC id of the `wc_sessionRequest` in flight or answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_id: Option<u64>,

    /// Rendezvous topic used until `peer_id` is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_topic: Option<String>,

    /// Network identifier.
    #[serde(default)]
    pub chain_id: u64,

    /// Ordered account identifiers.
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl Session {
    /// Fresh session pointed at a bridge. `client_id` is generated here
    /// and immutable afterwards.
    pub fn new(bridge: impl Into<String>, client_meta: PeerMeta) -> Self {
        Self {
            connected: false,
            bridge: bridge.into(),
            key: None,
            client_id: Uuid::new_v4().to_string(),
            peer_id: None,
            client_meta,
            peer_meta: None,
            handshake_id: None,
            handshake_topic: None,
            chain_id: 0,
            accounts: Vec::new(),
        }
    }

    /// A handshake is underway but the peer has not approved yet.
    pub fn is_pending(&self) -> bool {
        self.handshake_topic.is_some() && !self.connected
    }

    /// Current chain and accounts as a [`SessionStatus`].
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            chain_id: self.chain_id,
            accounts: self.accounts.clone(),
        }
    }

    /// Forget all handshake and peer state, returning to fresh.
    ///
    /// Called after rejections and negative session updates.
    pub fn reset(&mut self) {
        self.connected = false;
        self.peer_id = None;
        self.peer_meta = None;
        self.handshake_id = None;
        self.handshake_topic = None;
        self.accounts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> PeerMeta {
        PeerMeta {
            name: "example dapp".into(),
            description: "test".into(),
            url: "https://dapp.example".into(),
            icons: vec!["https://dapp.example/icon.png".into()],
        }
    }

    #[test]
    fn test_fresh_session_is_neither_pending_nor_connected() {
        let session = Session::new("https://b.example", meta());
        assert!(!session.is_pending());
        assert!(!session.connected);
        assert!(!session.client_id.is_empty());
    }

    #[test]
    fn test_pending_excludes_connected() {
        let mut session = Session::new("https://b.example", meta());
        session.handshake_topic = Some("abc123".into());
        assert!(session.is_pending());

        session.connected = true;
        assert!(!session.is_pending());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut session = Session::new("https://b.example", meta());
        session.key = Some(SessionKey::from_bytes(vec![0x11; 32]));
        session.peer_id = Some("peer-1".into());
        session.handshake_id = Some(1_700_000_000_000_001);
        session.handshake_topic = Some("topic-1".into());
        session.chain_id = 1;
        session.accounts = vec!["0xabc".into()];
        session.connected = true;

        let raw = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&raw).unwrap();
        assert_eq!(session, restored);
    }

    #[test]
    fn test_snapshot_uses_camel_case_fields() {
        let session = Session::new("https://b.example", meta());
        let raw = serde_json::to_value(&session).unwrap();
        assert!(raw.get("clientId").is_some());
        assert!(raw.get("clientMeta").is_some());
        assert!(raw.get("chainId").is_some());
    }

    #[test]
    fn test_reset_returns_to_fresh() {
        let mut session = Session::new("https://b.example", meta());
        session.handshake_topic = Some("t".into());
        session.peer_id = Some("p".into());
        session.connected = true;
        session.accounts = vec!["0xabc".into()];

        session.reset();
        assert!(!session.connected);
        assert!(!session.is_pending());
        assert!(session.peer_id.is_none());
        assert!(session.accounts.is_empty());
    }
}
