//! Walletwire connector.
//!
//! Async client endpoint for relay-mediated, end-to-end encrypted
//! JSON-RPC sessions between a dApp and a remote wallet. Two peers that
//! never directly connect rendezvous through an untrusted bridge: the
//! dApp publishes a `wc_sessionRequest` on a random handshake topic and
//! displays the handshake URI; the wallet scans it, rotates the key and
//! answers; from then on arbitrary JSON-RPC calls tunnel through the
//! relay inside AEAD envelopes.
//!
//! # Invariants
//!
//! - Every payload is sealed before it reaches a frame; no key, no frame.
//! - Frames submitted before the socket opens drain in order, after the
//!   client-id subscription.
//! - Inbound frames on foreign topics are dropped without side effects.
//! - The socket is single-shot: no reconnection, no resubscription.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod config;
mod connector;
pub mod error;
pub mod relay;
pub mod store;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use error::ConnectorError;
pub use relay::{Frame, FrameKind};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStorage};
