//! Handshake URI codec.
//!
//! `wc:<handshakeTopic>@<version>?bridge=<url-encoded>&key=<hex>`
//!
//! The URI is both human-shared (QR code) and cryptographic material:
//! whoever scans it holds the bridge address, the rendezvous topic and
//! the initial symmetric key.

use std::fmt;

use url::{form_urlencoded, Url};

use crate::crypto::SessionKey;
use crate::error::ProtocolError;

/// URI scheme.
pub const URI_SCHEME: &str = "wc";

/// Protocol version this crate speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// A parsed handshake URI.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeUri {
    /// Rendezvous topic until the peer id is known.
    pub handshake_topic: String,
    /// Protocol version; always [`PROTOCOL_VERSION`] after parsing.
    pub version: u32,
    /// Bridge URL, decoded.
    pub bridge: String,
    /// Initial symmetric key.
    pub key: SessionKey,
}

impl HandshakeUri {
    /// Build a version-1 URI from its parts.
    pub fn new(handshake_topic: impl Into<String>, bridge: impl Into<String>, key: SessionKey) -> Self {
        Self {
            handshake_topic: handshake_topic.into(),
            version: PROTOCOL_VERSION,
            bridge: bridge.into(),
            key,
        }
    }

    /// Parse a handshake URI.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidUri`] if the scheme is not `wc`, the topic,
    /// bridge or key is missing or empty, or the key is not hex.
    /// [`ProtocolError::UnsupportedVersion`] for any version other than 1.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let url = Url::parse(input).map_err(|_| ProtocolError::InvalidUri)?;
        if url.scheme() != URI_SCHEME {
            return Err(ProtocolError::InvalidUri);
        }

        let (topic, version) = url.path().split_once('@').ok_or(ProtocolError::InvalidUri)?;
        if topic.is_empty() {
            return Err(ProtocolError::InvalidUri);
        }
        let version: u32 = version.parse().map_err(|_| ProtocolError::InvalidUri)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion);
        }

        let mut bridge = None;
        let mut key = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "bridge" => bridge = Some(value.into_owned()),
                "key" => key = Some(value.into_owned()),
                _ => {}
            }
        }

        let bridge = bridge
            .filter(|value| !value.is_empty())
            .ok_or(ProtocolError::InvalidUri)?;
        let key = key
            .filter(|value| !value.is_empty())
            .ok_or(ProtocolError::InvalidUri)?;
        let key = SessionKey::from_hex(&key).map_err(|_| ProtocolError::InvalidUri)?;

        Ok(Self {
            handshake_topic: topic.to_string(),
            version,
            bridge,
            key,
        })
    }
}

impl fmt::Display for HandshakeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bridge: String = form_urlencoded::byte_serialize(self.bridge.as_bytes()).collect();
        write!(
            f,
            "{}:{}@{}?bridge={}&key={}",
            URI_SCHEME,
            self.handshake_topic,
            self.version,
            bridge,
            self.key.to_hex()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_uri() {
        let uri =
            HandshakeUri::parse("wc:abc123@1?bridge=https%3A%2F%2Fb.example&key=deadbeef").unwrap();
        assert_eq!(uri.handshake_topic, "abc123");
        assert_eq!(uri.version, 1);
        assert_eq!(uri.bridge, "https://b.example");
        assert_eq!(uri.key.to_hex(), "deadbeef");
    }

    #[test]
    fn test_format_reference_uri() {
        let uri = HandshakeUri::new(
            "abc123",
            "https://b.example",
            SessionKey::from_hex("deadbeef").unwrap(),
        );
        assert_eq!(
            uri.to_string(),
            "wc:abc123@1?bridge=https%3A%2F%2Fb.example&key=deadbeef"
        );
    }

    #[test]
    fn test_roundtrip_is_stable() {
        let original = "wc:abc123@1?bridge=https%3A%2F%2Fb.example&key=deadbeef";
        let uri = HandshakeUri::parse(original).unwrap();
        assert_eq!(uri.to_string(), original);
    }

    #[test]
    fn test_bridge_with_reserved_characters_roundtrips() {
        let bridge = "https://b.example/path?x=1&y=2 z=3";
        let key = SessionKey::from_hex("00ff").unwrap();
        let uri = HandshakeUri::new("topic", bridge, key);
        let parsed = HandshakeUri::parse(&uri.to_string()).unwrap();
        assert_eq!(parsed.bridge, bridge);
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        assert_eq!(
            HandshakeUri::parse("http:abc@1?bridge=b&key=aa"),
            Err(ProtocolError::InvalidUri)
        );
    }

    #[test]
    fn test_rejects_unknown_version() {
        assert_eq!(
            HandshakeUri::parse("wc:abc@2?bridge=https%3A%2F%2Fb.example&key=aa"),
            Err(ProtocolError::UnsupportedVersion)
        );
    }

    #[test]
    fn test_rejects_missing_fields() {
        // No key.
        assert_eq!(
            HandshakeUri::parse("wc:abc@1?bridge=https%3A%2F%2Fb.example"),
            Err(ProtocolError::InvalidUri)
        );
        // No bridge.
        assert_eq!(
            HandshakeUri::parse("wc:abc@1?key=aa"),
            Err(ProtocolError::InvalidUri)
        );
        // No topic.
        assert_eq!(
            HandshakeUri::parse("wc:@1?bridge=b&key=aa"),
            Err(ProtocolError::InvalidUri)
        );
        // No version separator.
        assert_eq!(
            HandshakeUri::parse("wc:abc?bridge=b&key=aa"),
            Err(ProtocolError::InvalidUri)
        );
    }

    #[test]
    fn test_rejects_non_hex_key() {
        assert_eq!(
            HandshakeUri::parse("wc:abc@1?bridge=https%3A%2F%2Fb.example&key=nothex"),
            Err(ProtocolError::InvalidUri)
        );
    }
}
