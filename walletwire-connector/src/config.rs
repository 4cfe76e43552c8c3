//! Connector configuration.

use std::time::Duration;

use walletwire_core::{PeerMeta, Session};

/// Default deadline for outbound calls (5 minutes).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pre-connect send queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Configuration for constructing a [`crate::Connector`].
///
/// Exactly one of `bridge`, `uri` or `session` must be supplied; a
/// session may also be picked up implicitly from storage. Supplying
/// more than one fails construction with `ConflictingInitialization`;
/// supplying none (and finding no stored snapshot) fails with
/// `MissingInitialization`.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Relay URL (dApp starting fresh).
    pub bridge: Option<String>,
    /// Handshake URI (wallet joining a session).
    pub uri: Option<String>,
    /// Previously persisted session (resuming).
    pub session: Option<Session>,
    /// Our descriptive record; immutable after construction.
    pub client_meta: PeerMeta,
    /// Deadline applied to every outbound call.
    pub call_timeout: Duration,
    /// Capacity of the pre-connect send queue; overflow fails the send.
    pub queue_capacity: usize,
}

impl ConnectorConfig {
    fn base(client_meta: PeerMeta) -> Self {
        Self {
            bridge: None,
            uri: None,
            session: None,
            client_meta,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Configuration for a fresh dApp session against a bridge.
    pub fn bridge(url: impl Into<String>, client_meta: PeerMeta) -> Self {
        Self {
            bridge: Some(url.into()),
            ..Self::base(client_meta)
        }
    }

    /// Configuration for a wallet joining via a handshake URI.
    pub fn uri(uri: impl Into<String>, client_meta: PeerMeta) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::base(client_meta)
        }
    }

    /// Configuration resuming an explicit session snapshot.
    pub fn session(session: Session, client_meta: PeerMeta) -> Self {
        Self {
            session: Some(session),
            ..Self::base(client_meta)
        }
    }

    /// Configuration with no explicit source; the session must come from
    /// storage or construction fails with `MissingInitialization`.
    pub fn from_storage(client_meta: PeerMeta) -> Self {
        Self::base(client_meta)
    }

    /// Override the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the pre-connect queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}
