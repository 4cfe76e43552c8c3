//! Cipher interface and AEAD envelope codec.
//!
//! The connector never touches a cipher directly; everything goes through
//! the [`CipherSuite`] trait so the primitive library stays injectable.
//! Key material is zeroized on drop and crosses process boundaries (URIs,
//! snapshots, `wc_exchangeKey` params) as hex only.
//!
//! The envelope is opaque JSON to this layer: [`seal`] and [`open`] move
//! payloads in and out of it without inspecting the cipher's fields.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use crate::error::ProtocolError;

/// Key length produced by [`AesGcmCipher::generate_key`] (256 bits).
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length (96 bits).
const NONCE_LENGTH: usize = 12;

/// A symmetric session key.
///
/// Stored as raw bytes, zeroized on drop, hex-encoded at every boundary.
/// The length is not enforced here; the cipher suite in use decides what
/// it accepts.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<Vec<u8>>);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Decode a key from its hex boundary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidKey`] if the input is empty or not
    /// valid hex.
    pub fn from_hex(encoded: &str) -> Result<Self, ProtocolError> {
        if encoded.is_empty() {
            return Err(ProtocolError::InvalidKey);
        }
        let bytes = hex::decode(encoded).map_err(|_| ProtocolError::InvalidKey)?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    /// Hex boundary encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(&*self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "SessionKey({} bytes)", self.0.len())
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// An AEAD envelope as produced by a cipher suite.
///
/// Opaque JSON: this layer serializes it into a relay frame payload and
/// back, nothing more. Only the cipher that produced it knows its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope(Value);

impl Envelope {
    /// Wrap a cipher-produced JSON value.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Serialize the envelope into the string carried by a publish frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportProtocol`] if the value cannot be
    /// serialized.
    pub fn to_payload(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(&self.0).map_err(|_| ProtocolError::TransportProtocol)
    }

    /// Parse an envelope out of a publish frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportProtocol`] on malformed JSON.
    pub fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(payload)
            .map(Self)
            .map_err(|_| ProtocolError::TransportProtocol)
    }
}

/// The injected cryptographic primitive library.
///
/// Implementations must be safe to call from concurrent tasks.
pub trait CipherSuite: Send + Sync {
    /// Generate a fresh symmetric key.
    fn generate_key(&self) -> SessionKey;

    /// Encrypt a plaintext under `key` into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CryptoUnavailable`] if the cipher refuses
    /// the key or the encryption fails.
    fn encrypt(&self, plaintext: &[u8], key: &SessionKey) -> Result<Envelope, ProtocolError>;

    /// Decrypt an envelope under `key`.
    ///
    /// Returns `None` on any authentication or format failure; the caller
    /// drops the frame.
    fn decrypt(&self, envelope: &Envelope, key: &SessionKey) -> Option<Vec<u8>>;
}

/// Default cipher suite: AES-256-GCM with a random 96-bit nonce.
///
/// Envelope shape: `{"iv": "<hex nonce>", "data": "<hex ciphertext>"}`,
/// with the authentication tag embedded in `data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl CipherSuite for AesGcmCipher {
    fn generate_key(&self) -> SessionKey {
        let mut bytes = vec![0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        SessionKey::from_bytes(bytes)
    }

    fn encrypt(&self, plaintext: &[u8], key: &SessionKey) -> Result<Envelope, ProtocolError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| ProtocolError::CryptoUnavailable)?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| ProtocolError::CryptoUnavailable)?;

        Ok(Envelope(json!({
            "iv": hex::encode(nonce_bytes),
            "data": hex::encode(ciphertext),
        })))
    }

    fn decrypt(&self, envelope: &Envelope, key: &SessionKey) -> Option<Vec<u8>> {
        let iv = envelope.0.get("iv").and_then(Value::as_str)?;
        let data = envelope.0.get("data").and_then(Value::as_str)?;

        let nonce_bytes = hex::decode(iv).ok()?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return None;
        }
        let ciphertext = hex::decode(data).ok()?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).ok()?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .ok()
    }
}

/// Encrypt a JSON payload into a frame payload string.
///
/// # Errors
///
/// Returns [`ProtocolError::CryptoUnavailable`] when `key` is absent; no
/// frame must be emitted in that case.
pub fn seal(
    payload: &Value,
    key: Option<&SessionKey>,
    cipher: &dyn CipherSuite,
) -> Result<String, ProtocolError> {
    let key = key.ok_or(ProtocolError::CryptoUnavailable)?;
    let plaintext = serde_json::to_vec(payload).map_err(|_| ProtocolError::TransportProtocol)?;
    cipher.encrypt(&plaintext, key)?.to_payload()
}

/// Decrypt a frame payload string back into a JSON payload.
///
/// Returns `Ok(None)` for frames that parse as an envelope but do not
/// decrypt under `key` (or when no key is held); such frames are dropped.
///
/// # Errors
///
/// Returns [`ProtocolError::TransportProtocol`] on malformed envelope or
/// plaintext JSON, which is fatal to the receive path.
pub fn open(
    payload: &str,
    key: Option<&SessionKey>,
    cipher: &dyn CipherSuite,
) -> Result<Option<Value>, ProtocolError> {
    let envelope = Envelope::from_payload(payload)?;
    let Some(key) = key else {
        return Ok(None);
    };
    let Some(plaintext) = cipher.decrypt(&envelope, key) else {
        return Ok(None);
    };
    serde_json::from_slice(&plaintext)
        .map(Some)
        .map_err(|_| ProtocolError::TransportProtocol)
}
