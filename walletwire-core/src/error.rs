//! Protocol errors.
//!
//! Violated preconditions fail fast to the caller. Rejected sessions and
//! negative session updates are not errors; they are ordinary state
//! transitions and never surface here.

use std::fmt;

/// All protocol-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Connector constructed without a bridge, a handshake URI, or a session.
    MissingInitialization,

    /// Connector constructed with more than one of bridge, URI and session.
    ConflictingInitialization,

    /// Handshake URI is malformed or carries the wrong scheme.
    InvalidUri,

    /// Handshake URI carries a protocol version this crate does not speak.
    UnsupportedVersion,

    /// Key material is not valid hex.
    InvalidKey,

    /// State-machine operation attempted in the wrong state.
    PreconditionViolation,

    /// Malformed JSON in a relay frame, an envelope, or a payload.
    TransportProtocol,

    /// Encryption attempted without a key, or the cipher refused the key.
    CryptoUnavailable,

    /// A key exchange was issued while another one is still in flight.
    KeyExchangeInFlight,

    /// A response arrived without a `result` field.
    MissingResult,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInitialization => write!(f, "missing bridge, uri or session"),
            Self::ConflictingInitialization => write!(f, "more than one of bridge, uri and session"),
            Self::InvalidUri => write!(f, "invalid handshake uri"),
            Self::UnsupportedVersion => write!(f, "unsupported protocol version"),
            Self::InvalidKey => write!(f, "invalid key encoding"),
            Self::PreconditionViolation => write!(f, "operation not allowed in current state"),
            Self::TransportProtocol => write!(f, "malformed transport payload"),
            Self::CryptoUnavailable => write!(f, "encryption key unavailable"),
            Self::KeyExchangeInFlight => write!(f, "key exchange already in flight"),
            Self::MissingResult => write!(f, "response missing result"),
        }
    }
}

impl std::error::Error for ProtocolError {}
