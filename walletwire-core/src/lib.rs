//! Walletwire protocol core.
//!
//! Sans-I/O building blocks for the relay-mediated, end-to-end encrypted
//! JSON-RPC session protocol:
//!
//! - Handshake URI codec (`wc:<topic>@1?bridge=…&key=…`)
//! - AEAD envelope codec behind an injected [`CipherSuite`]
//! - JSON-RPC 2.0 payload layer with session-unique id allocation
//! - Durable session snapshot model
//! - Event dispatcher with method-name fan-out
//!
//! Nothing in this crate opens a socket or spawns a task; the async
//! connector lives in `walletwire-connector`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod crypto;
pub mod error;
pub mod events;
pub mod rpc;
pub mod session;
pub mod uri;

pub use crypto::{AesGcmCipher, CipherSuite, Envelope, SessionKey};
pub use error::ProtocolError;
pub use events::{Event, EventDispatcher};
pub use rpc::{Payload, Request, Response};
pub use session::{PeerMeta, Session, SessionStatus};
pub use uri::HandshakeUri;
