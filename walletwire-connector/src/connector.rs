//! The connector: session state machine, key manager and wiring.
//!
//! # State machine
//!
//! Fresh → Pending → Connected → Terminated. A dApp goes pending via
//! `create_session`, a wallet via an inbound `wc_sessionRequest`.
//! Approval connects both sides; `kill_session`, rejections and
//! negative `wc_sessionUpdate` payloads terminate and erase storage.
//!
//! # Key handling invariants
//!
//! - Nothing is ever published without a key; sealing without one fails
//!   before a frame exists.
//! - At most one key exchange is in flight per side.
//! - The exchange ack is the last frame under the old key; each side
//!   swaps only after sealing (responder) or resolving (initiator) it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use walletwire_core::crypto;
use walletwire_core::events::{self, Event, EventDispatcher};
use walletwire_core::rpc::{
    methods, ExchangeKeyParams, Payload, Request, Response, SessionParams, SessionRequestParams,
};
use walletwire_core::{
    AesGcmCipher, CipherSuite, HandshakeUri, PeerMeta, ProtocolError, Session, SessionKey,
    SessionStatus,
};

use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::relay::{self, Frame, FrameKind, RelaySink, RelayStream};
use crate::store::{KeyValueStore, SessionStorage};

/// Mutable connector state guarded by one lock.
struct ConnectorState {
    session: Session,
    /// Staged successor key while a rotation we initiated is in flight.
    next_key: Option<SessionKey>,
}

/// Outbound path: the sink once open, the ordered queue before that.
struct Outbound {
    sink: Option<RelaySink>,
    queue: VecDeque<Frame>,
}

struct Shared {
    cipher: Box<dyn CipherSuite>,
    storage: Option<SessionStorage>,
    call_timeout: Duration,
    queue_capacity: usize,
    state: StdMutex<ConnectorState>,
    dispatcher: StdMutex<EventDispatcher>,
    pending: DashMap<u64, oneshot::Sender<Response>>,
    outbound: AsyncMutex<Outbound>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

/// A relay-mediated, end-to-end encrypted JSON-RPC session endpoint.
///
/// Does not implement `Clone`; the connector exclusively owns its
/// socket and listener table.
pub struct Connector {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.shared.state();
        f.debug_struct("Connector")
            .field("client_id", &st.session.client_id)
            .field("connected", &st.session.connected)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Construct a connector with the default AES-GCM cipher suite.
    ///
    /// # Errors
    ///
    /// `MissingInitialization` when the config carries none of bridge,
    /// URI or session and storage holds no snapshot;
    /// `ConflictingInitialization` when it carries more than one;
    /// `InvalidUri` / `UnsupportedVersion` for a bad handshake URI.
    pub fn new(
        config: ConnectorConfig,
        store: Option<Box<dyn KeyValueStore>>,
    ) -> Result<Self, ConnectorError> {
        Self::with_cipher(config, Box::new(AesGcmCipher), store)
    }

    /// Construct a connector with an injected cipher suite.
    ///
    /// # Errors
    ///
    /// Same admission rules as [`Connector::new`].
    pub fn with_cipher(
        config: ConnectorConfig,
        cipher: Box<dyn CipherSuite>,
        store: Option<Box<dyn KeyValueStore>>,
    ) -> Result<Self, ConnectorError> {
        let storage = store.map(SessionStorage::new);

        // Exactly one of bridge, uri and session may be supplied.
        let sources = usize::from(config.bridge.is_some())
            + usize::from(config.uri.is_some())
            + usize::from(config.session.is_some());
        if sources > 1 {
            return Err(ProtocolError::ConflictingInitialization.into());
        }

        let session = if let Some(mut session) = config.session {
            // The locally supplied meta always wins over the snapshot's.
            session.client_meta = config.client_meta;
            session
        } else if let Some(raw) = config.uri {
            let uri = HandshakeUri::parse(&raw)?;
            let mut session = Session::new(uri.bridge, config.client_meta);
            session.key = Some(uri.key);
            session.handshake_topic = Some(uri.handshake_topic);
            session
        } else if let Some(bridge) = config.bridge {
            Session::new(bridge, config.client_meta)
        } else if let Some(mut session) = storage.as_ref().and_then(SessionStorage::load) {
            session.client_meta = config.client_meta;
            session
        } else {
            return Err(ProtocolError::MissingInitialization.into());
        };

        Ok(Self {
            shared: Arc::new(Shared {
                cipher,
                storage,
                call_timeout: config.call_timeout,
                queue_capacity: config.queue_capacity,
                state: StdMutex::new(ConnectorState {
                    session,
                    next_key: None,
                }),
                dispatcher: StdMutex::new(EventDispatcher::new()),
                pending: DashMap::new(),
                outbound: AsyncMutex::new(Outbound {
                    sink: None,
                    queue: VecDeque::new(),
                }),
                reader: StdMutex::new(None),
            }),
        })
    }

    /// Open the relay socket, subscribe our topics, drain the queue and
    /// start the receive task.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` if already connected to the relay,
    /// `ConnectionFailed` / `WebSocket` on socket trouble.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let (bridge, client_id, rendezvous) = {
            let st = self.shared.state();
            // A wallet joining via URI has a rendezvous topic but no
            // handshake id yet; it must listen on that topic too.
            let rendezvous = if st.session.handshake_id.is_none() && st.session.is_pending() {
                st.session.handshake_topic.clone()
            } else {
                None
            };
            (
                st.session.bridge.clone(),
                st.session.client_id.clone(),
                rendezvous,
            )
        };

        let mut outbound = self.shared.outbound.lock().await;
        if outbound.sink.is_some() {
            return Err(ProtocolError::PreconditionViolation.into());
        }

        let (mut sink, stream) = relay::open(&bridge).await?;
        sink.send_frame(&Frame::subscribe(&client_id)).await?;
        if let Some(topic) = rendezvous {
            sink.send_frame(&Frame::subscribe(topic)).await?;
        }
        while let Some(frame) = outbound.queue.pop_front() {
            sink.send_frame(&frame).await?;
        }
        outbound.sink = Some(sink);
        drop(outbound);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.receive_loop(stream).await });
        *self.shared.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Close the relay socket and stop the receive task.
    pub async fn close(&self) {
        if let Some(handle) = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        let mut outbound = self.shared.outbound.lock().await;
        if let Some(mut sink) = outbound.sink.take() {
            sink.close().await;
        }
    }

    /// Register a listener. Keys are method names, `response:<id>`,
    /// the synthetic session events, or `call_request` as the generic
    /// request sink.
    pub fn on(&self, event: &str, callback: impl Fn(&Event) + Send + Sync + 'static) {
        self.shared
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .on(event, callback);
    }

    /// Remove every listener registered for `event`.
    pub fn off(&self, event: &str) {
        self.shared
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .off(event);
    }

    /// Start a session as the dApp: generate key and rendezvous topic,
    /// publish `wc_sessionRequest`, persist the snapshot.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` if a session is already pending or
    /// connected.
    pub async fn create_session(&self, chain_id: Option<u64>) -> Result<(), ConnectorError> {
        let frame = {
            let mut st = self.shared.state();
            if st.session.connected || st.session.is_pending() {
                return Err(ProtocolError::PreconditionViolation.into());
            }
            // Always a fresh key; a terminated session's key must never
            // carry over into a new handshake.
            st.session.key = Some(self.shared.cipher.generate_key());
            let topic = Uuid::new_v4().to_string();
            let params = SessionRequestParams {
                peer_id: st.session.client_id.clone(),
                peer_meta: st.session.client_meta.clone(),
                chain_id,
            };
            let request = Request::internal(methods::SESSION_REQUEST, &params)?;
            st.session.handshake_id = Some(request.id);
            st.session.handshake_topic = Some(topic.clone());
            if let Some(chain_id) = chain_id {
                st.session.chain_id = chain_id;
            }
            let sealed = self.shared.seal_payload(&st, &request)?;
            self.shared.persist(&st.session);
            Frame::publish(topic, sealed)
        };
        self.shared.submit(frame).await
    }

    /// The handshake URI to display as a QR code while pending.
    pub fn handshake_uri(&self) -> Option<HandshakeUri> {
        let st = self.shared.state();
        let topic = st.session.handshake_topic.clone()?;
        let key = st.session.key.clone()?;
        Some(HandshakeUri::new(topic, st.session.bridge.clone(), key))
    }

    /// Approve the pending session as the wallet, replying to the
    /// handshake request with chain and accounts.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` when already connected or when no
    /// handshake is pending.
    pub async fn approve_session(&self, status: SessionStatus) -> Result<(), ConnectorError> {
        let frame = {
            let mut st = self.shared.state();
            if st.session.connected {
                return Err(ProtocolError::PreconditionViolation.into());
            }
            let handshake_id = st
                .session
                .handshake_id
                .ok_or(ProtocolError::PreconditionViolation)?;
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;

            st.session.chain_id = status.chain_id;
            st.session.accounts = status.accounts.clone();
            st.session.connected = true;

            let params = SessionParams {
                approved: true,
                chain_id: Some(status.chain_id),
                accounts: Some(status.accounts.clone()),
                peer_id: Some(st.session.client_id.clone()),
                peer_meta: Some(st.session.client_meta.clone()),
                message: None,
            };
            let value =
                serde_json::to_value(&params).map_err(|_| ProtocolError::TransportProtocol)?;
            let response = Response::result(handshake_id, value);
            let sealed = self.shared.seal_payload(&st, &response)?;
            self.shared.persist(&st.session);
            Frame::publish(topic, sealed)
        };
        self.shared.submit(frame).await?;
        self.shared
            .emit_session(events::CONNECT, json!([status]));
        Ok(())
    }

    /// Reject the pending session as the wallet.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` when already connected or when no
    /// handshake is pending.
    pub async fn reject_session(&self, message: Option<String>) -> Result<(), ConnectorError> {
        let frame = {
            let mut st = self.shared.state();
            if st.session.connected {
                return Err(ProtocolError::PreconditionViolation.into());
            }
            let handshake_id = st
                .session
                .handshake_id
                .ok_or(ProtocolError::PreconditionViolation)?;
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;

            let params = SessionParams {
                approved: false,
                message: message.clone(),
                ..SessionParams::default()
            };
            let value =
                serde_json::to_value(&params).map_err(|_| ProtocolError::TransportProtocol)?;
            let response = Response::result(handshake_id, value);
            let sealed = self.shared.seal_payload(&st, &response)?;
            st.session.reset();
            self.shared.erase();
            Frame::publish(topic, sealed)
        };
        self.shared.submit(frame).await?;
        self.shared
            .emit_session(events::DISCONNECT, json!([{ "message": message }]));
        Ok(())
    }

    /// Push new chain and accounts to the peer on an approved session.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` while not connected.
    pub async fn update_session(&self, status: SessionStatus) -> Result<(), ConnectorError> {
        let frame = {
            let mut st = self.shared.state();
            if !st.session.connected {
                return Err(ProtocolError::PreconditionViolation.into());
            }
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;
            st.session.chain_id = status.chain_id;
            st.session.accounts = status.accounts.clone();

            let params = SessionParams {
                approved: true,
                chain_id: Some(status.chain_id),
                accounts: Some(status.accounts.clone()),
                ..SessionParams::default()
            };
            let request = Request::internal(methods::SESSION_UPDATE, &params)?;
            let sealed = self.shared.seal_payload(&st, &request)?;
            self.shared.persist(&st.session);
            Frame::publish(topic, sealed)
        };
        self.shared.submit(frame).await?;
        self.shared
            .emit_session(events::SESSION_UPDATE, json!([status]));
        Ok(())
    }

    /// Terminate an approved session, notifying the peer and erasing
    /// the stored snapshot.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` while not connected.
    pub async fn kill_session(&self, message: Option<String>) -> Result<(), ConnectorError> {
        let frame = {
            let mut st = self.shared.state();
            if !st.session.connected {
                return Err(ProtocolError::PreconditionViolation.into());
            }
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;

            let params = SessionParams {
                approved: false,
                message: message.clone(),
                ..SessionParams::default()
            };
            let request = Request::internal(methods::SESSION_UPDATE, &params)?;
            let sealed = self.shared.seal_payload(&st, &request)?;
            st.session.reset();
            self.shared.erase();
            Frame::publish(topic, sealed)
        };
        self.shared.submit(frame).await?;
        self.shared
            .emit_session(events::DISCONNECT, json!([{ "message": message }]));
        Ok(())
    }

    /// Send an arbitrary JSON-RPC call to the peer and await its result.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` while not connected, `Timeout` when the
    /// deadline expires, `Rpc` when the peer answers with an error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectorError> {
        {
            let st = self.shared.state();
            if !st.session.connected {
                return Err(ProtocolError::PreconditionViolation.into());
            }
        }
        self.shared.call(Request::new(method, params)).await
    }

    /// `eth_sendTransaction` passthrough.
    ///
    /// # Errors
    ///
    /// See [`Connector::request`].
    pub async fn send_transaction(&self, transaction: Value) -> Result<Value, ConnectorError> {
        self.request(methods::ETH_SEND_TRANSACTION, json!([transaction]))
            .await
    }

    /// `eth_sign` passthrough; `params` is the positional array.
    ///
    /// # Errors
    ///
    /// See [`Connector::request`].
    pub async fn sign_message(&self, params: Value) -> Result<Value, ConnectorError> {
        self.request(methods::ETH_SIGN, params).await
    }

    /// `eth_signTypedData` passthrough; `params` is the positional array.
    ///
    /// # Errors
    ///
    /// See [`Connector::request`].
    pub async fn sign_typed_data(&self, params: Value) -> Result<Value, ConnectorError> {
        self.request(methods::ETH_SIGN_TYPED_DATA, params).await
    }

    /// Answer an inbound call with a result (wallet side).
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` when the peer is unknown.
    pub async fn approve_request(&self, id: u64, result: Value) -> Result<(), ConnectorError> {
        self.shared.respond(Response::result(id, result)).await
    }

    /// Answer an inbound call with an error (wallet side).
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` when the peer is unknown.
    pub async fn reject_request(
        &self,
        id: u64,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), ConnectorError> {
        self.shared.respond(Response::error(id, code, message)).await
    }

    /// Rotate the session key: offer a successor under the current key
    /// and swap once the peer acknowledges.
    ///
    /// # Errors
    ///
    /// `KeyExchangeInFlight` when a rotation is already staged,
    /// `PreconditionViolation` when the peer is unknown.
    pub async fn exchange_key(&self) -> Result<(), ConnectorError> {
        self.shared.rotate_key().await
    }

    /// Our client id (also our relay topic).
    pub fn client_id(&self) -> String {
        self.shared.state().session.client_id.clone()
    }

    /// Whether the session is approved.
    pub fn connected(&self) -> bool {
        self.shared.state().session.connected
    }

    /// Whether a handshake is underway.
    pub fn pending(&self) -> bool {
        self.shared.state().session.is_pending()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.shared.state().session.clone()
    }

    /// Current chain and accounts.
    pub fn status(&self) -> SessionStatus {
        self.shared.state().session.status()
    }

    /// Peer's descriptive record, once known.
    pub fn peer_meta(&self) -> Option<PeerMeta> {
        self.shared.state().session.peer_meta.clone()
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Some(handle) = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, session: &Session) {
        if let Some(storage) = &self.storage {
            storage.save(session);
        }
    }

    fn erase(&self) {
        if let Some(storage) = &self.storage {
            storage.erase();
        }
    }

    fn emit(&self, event: &Event) {
        self.dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dispatch(event);
    }

    fn emit_session(&self, name: &str, params: Value) {
        self.emit(&Event::Session {
            name: name.to_string(),
            params,
        });
    }

    /// Seal a payload under the session's current key.
    fn seal_payload<P: serde::Serialize>(
        &self,
        st: &ConnectorState,
        payload: &P,
    ) -> Result<String, ConnectorError> {
        let value = serde_json::to_value(payload).map_err(|_| ProtocolError::TransportProtocol)?;
        Ok(crypto::seal(
            &value,
            st.session.key.as_ref(),
            self.cipher.as_ref(),
        )?)
    }

    /// Send a frame, or queue it in order while the socket is not open.
    async fn submit(&self, frame: Frame) -> Result<(), ConnectorError> {
        let mut outbound = self.outbound.lock().await;
        match outbound.sink.as_mut() {
            Some(sink) => sink.send_frame(&frame).await,
            None => {
                if outbound.queue.len() >= self.queue_capacity {
                    return Err(ConnectorError::QueueFull);
                }
                outbound.queue.push_back(frame);
                Ok(())
            }
        }
    }

    /// Send a request to the peer and await the correlated response.
    async fn call(&self, request: Request) -> Result<Value, ConnectorError> {
        let id = request.id;
        let frame = {
            let st = self.state();
            let topic = st
                .session
                .peer_id
                .clone()
                .or_else(|| st.session.handshake_topic.clone())
                .ok_or(ProtocolError::PreconditionViolation)?;
            let sealed = self.seal_payload(&st, &request)?;
            Frame::publish(topic, sealed)
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if let Err(e) = self.submit(frame).await {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(ConnectorError::from),
            Ok(Err(_)) => Err(ConnectorError::SocketClosed),
            Err(_) => {
                // Reclaim the correlator so the pending table cannot leak.
                self.pending.remove(&id);
                Err(ConnectorError::Timeout)
            }
        }
    }

    /// Reply to an inbound request on the peer topic.
    async fn respond(&self, response: Response) -> Result<(), ConnectorError> {
        let frame = {
            let st = self.state();
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;
            let sealed = self.seal_payload(&st, &response)?;
            Frame::publish(topic, sealed)
        };
        self.submit(frame).await
    }

    /// Initiator half of the two-phase key swap.
    async fn rotate_key(&self) -> Result<(), ConnectorError> {
        let (id, frame) = {
            let mut st = self.state();
            if st.next_key.is_some() {
                return Err(ProtocolError::KeyExchangeInFlight.into());
            }
            let topic = st
                .session
                .peer_id
                .clone()
                .ok_or(ProtocolError::PreconditionViolation)?;
            let next = self.cipher.generate_key();
            let params = ExchangeKeyParams {
                peer_id: st.session.client_id.clone(),
                peer_meta: st.session.client_meta.clone(),
                next_key: next.to_hex(),
            };
            let request = Request::internal(methods::EXCHANGE_KEY, &params)?;
            // Sealed under the current key; the swap waits for the ack.
            let sealed = self.seal_payload(&st, &request)?;
            st.next_key = Some(next);
            (request.id, Frame::publish(topic, sealed))
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if let Err(e) = self.submit(frame).await {
            self.pending.remove(&id);
            self.state().next_key = None;
            return Err(e);
        }

        let outcome = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response
                .into_result()
                .map(|_| ())
                .map_err(ConnectorError::from),
            Ok(Err(_)) => Err(ConnectorError::SocketClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ConnectorError::Timeout)
            }
        };

        let mut st = self.state();
        match outcome {
            Ok(()) => {
                st.session.key = st.next_key.take();
                self.persist(&st.session);
                Ok(())
            }
            Err(e) => {
                st.next_key = None;
                Err(e)
            }
        }
    }

    /// Receive task: topic-filter, decrypt, classify, route.
    async fn receive_loop(self: Arc<Self>, mut stream: RelayStream) {
        loop {
            match stream.next_frame().await {
                Ok(Some(frame)) => {
                    if let Err(e) = Self::process_frame(&self, frame).await {
                        error!(error = %e, "fatal error on receive path");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("relay socket closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "relay receive failed");
                    break;
                }
            }
        }
        // Wake every pending call with SocketClosed.
        self.pending.clear();
    }

    async fn process_frame(shared: &Arc<Self>, frame: Frame) -> Result<(), ConnectorError> {
        if frame.kind != FrameKind::Pub {
            return Ok(());
        }

        let key = {
            let st = shared.state();
            let accepted = frame.topic == st.session.client_id
                || (!st.session.connected
                    && st.session.handshake_topic.as_deref() == Some(frame.topic.as_str()));
            if !accepted {
                debug!(topic = %frame.topic, "dropping frame for foreign topic");
                return Ok(());
            }
            st.session.key.clone()
        };

        let Some(value) = crypto::open(&frame.payload, key.as_ref(), shared.cipher.as_ref())?
        else {
            warn!(topic = %frame.topic, "dropping undecryptable frame");
            return Ok(());
        };

        match Payload::classify(value)? {
            Payload::Request(request) => Self::process_request(shared, request),
            Payload::Response(response) => {
                shared.process_response(response);
                Ok(())
            }
        }
    }

    fn process_request(shared: &Arc<Self>, request: Request) -> Result<(), ConnectorError> {
        match request.method.as_str() {
            methods::SESSION_REQUEST => Self::handle_session_request(shared, request),
            methods::SESSION_UPDATE => {
                shared.handle_session_update(&request);
                Ok(())
            }
            methods::EXCHANGE_KEY => {
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    if let Err(e) = shared.handle_exchange_key(request).await {
                        warn!(error = %e, "failed to answer key exchange");
                    }
                });
                Ok(())
            }
            _ => {
                shared.emit(&Event::Request(request));
                Ok(())
            }
        }
    }

    /// Wallet side of the handshake: record the peer, rotate the key,
    /// then surface the request to listeners for approval.
    fn handle_session_request(shared: &Arc<Self>, request: Request) -> Result<(), ConnectorError> {
        let params: SessionRequestParams = match request.first_param() {
            Ok(params) => params,
            Err(_) => {
                warn!("dropping wc_sessionRequest with malformed params");
                return Ok(());
            }
        };

        {
            let mut st = shared.state();
            if st.session.connected || st.session.handshake_id.is_some() {
                warn!("dropping wc_sessionRequest on non-fresh session");
                return Ok(());
            }
            st.session.handshake_id = Some(request.id);
            st.session.peer_id = Some(params.peer_id);
            st.session.peer_meta = Some(params.peer_meta);
            if let Some(chain_id) = params.chain_id {
                st.session.chain_id = chain_id;
            }
        }

        // Rotate first so the approval already travels under the fresh
        // key, then hand the request to the approval listeners.
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            if let Err(e) = shared.rotate_key().await {
                warn!(error = %e, "handshake key rotation failed");
            }
            shared.emit(&Event::Request(request));
        });
        Ok(())
    }

    /// Responder half of the two-phase key swap. The ack is sealed
    /// under the old key before the swap happens.
    async fn handle_exchange_key(&self, request: Request) -> Result<(), ConnectorError> {
        let params: ExchangeKeyParams = match request.first_param() {
            Ok(params) => params,
            Err(_) => {
                warn!("dropping wc_exchangeKey with malformed params");
                return Ok(());
            }
        };

        let frame = {
            let mut st = self.state();
            let topic = params.peer_id.clone();
            let current = st.session.key.clone();
            let seal_reply = |reply: &Response| -> Result<String, ConnectorError> {
                let value =
                    serde_json::to_value(reply).map_err(|_| ProtocolError::TransportProtocol)?;
                Ok(crypto::seal(&value, current.as_ref(), self.cipher.as_ref())?)
            };

            match SessionKey::from_hex(&params.next_key) {
                Err(_) => {
                    let reply = Response::error(request.id, -32602, "invalid nextKey");
                    Frame::publish(topic, seal_reply(&reply)?)
                }
                Ok(_) if st.next_key.is_some() => {
                    // Overlapping rotations are rejected outright.
                    let reply = Response::error(
                        request.id,
                        -32000,
                        ProtocolError::KeyExchangeInFlight.to_string(),
                    );
                    Frame::publish(topic, seal_reply(&reply)?)
                }
                Ok(offered) => {
                    if st.session.peer_id.is_none() {
                        st.session.peer_id = Some(params.peer_id.clone());
                    }
                    if st.session.peer_meta.is_none() {
                        st.session.peer_meta = Some(params.peer_meta.clone());
                    }
                    let reply = Response::result(request.id, json!(true));
                    let sealed = seal_reply(&reply)?;
                    st.session.key = Some(offered);
                    self.persist(&st.session);
                    Frame::publish(topic, sealed)
                }
            }
        };
        self.submit(frame).await
    }

    fn handle_session_update(&self, request: &Request) {
        let params: SessionParams = match request.first_param() {
            Ok(params) => params,
            Err(_) => {
                warn!("dropping wc_sessionUpdate with malformed params");
                return;
            }
        };

        if params.approved {
            let (first, status) = {
                let mut st = self.state();
                let first = !st.session.connected;
                st.session.connected = true;
                if let Some(chain_id) = params.chain_id {
                    st.session.chain_id = chain_id;
                }
                if let Some(accounts) = params.accounts {
                    st.session.accounts = accounts;
                }
                self.persist(&st.session);
                (first, st.session.status())
            };
            let name = if first {
                events::CONNECT
            } else {
                events::SESSION_UPDATE
            };
            self.emit_session(name, json!([status]));
        } else {
            {
                let mut st = self.state();
                st.session.reset();
                self.erase();
            }
            self.emit_session(events::DISCONNECT, json!([{ "message": params.message }]));
        }
    }

    fn process_response(&self, response: Response) {
        let is_handshake = {
            let st = self.state();
            !st.session.connected && st.session.handshake_id == Some(response.id)
        };
        if is_handshake {
            self.handle_session_response(&response);
        } else if let Some((_, tx)) = self.pending.remove(&response.id) {
            let _ = tx.send(response.clone());
        }
        self.emit(&Event::Response(response));
    }

    /// dApp side of the handshake: the response's unwrapped `result`
    /// carries the session params.
    fn handle_session_response(&self, response: &Response) {
        let params = response
            .result
            .clone()
            .and_then(|value| serde_json::from_value::<SessionParams>(value).ok());

        match params {
            Some(params) if params.approved => {
                let status = {
                    let mut st = self.state();
                    st.session.connected = true;
                    if params.peer_id.is_some() {
                        st.session.peer_id = params.peer_id;
                    }
                    if params.peer_meta.is_some() {
                        st.session.peer_meta = params.peer_meta;
                    }
                    if let Some(chain_id) = params.chain_id {
                        st.session.chain_id = chain_id;
                    }
                    if let Some(accounts) = params.accounts {
                        st.session.accounts = accounts;
                    }
                    self.persist(&st.session);
                    st.session.status()
                };
                self.emit_session(events::CONNECT, json!([status]));
            }
            // Errors, missing results and explicit rejections all count
            // as the peer declining the session.
            params => {
                let message = params.and_then(|p| p.message);
                {
                    let mut st = self.state();
                    st.session.reset();
                    self.erase();
                }
                self.emit_session(events::DISCONNECT, json!([{ "message": message }]));
            }
        }
    }
}
