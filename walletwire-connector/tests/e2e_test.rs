//! End-to-end tests: two connectors against an in-process bridge.
//!
//! Covers the full handshake (session request, automatic key rotation,
//! approval), call round-trips, on-demand rotation and termination.

use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use walletwire_bridge::run_bridge;
use walletwire_connector::{Connector, ConnectorConfig, MemoryStore};
use walletwire_core::{Event, PeerMeta, Request, SessionStatus};

const WAIT: Duration = Duration::from_secs(5);

fn meta(name: &str) -> PeerMeta {
    PeerMeta {
        name: name.into(),
        description: format!("{} description", name),
        url: format!("https://{}.example", name),
        icons: vec![],
    }
}

async fn start_bridge() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        run_bridge(listener).await;
    });
    sleep(Duration::from_millis(100)).await;
    // The connector rewrites http:// to ws:// itself.
    format!("http://{}", addr)
}

fn request_channel(
    connector: &Connector,
    event: &str,
) -> mpsc::UnboundedReceiver<Request> {
    let (tx, rx) = mpsc::unbounded_channel();
    connector.on(event, move |event| {
        if let Event::Request(request) = event {
            let _ = tx.send(request.clone());
        }
    });
    rx
}

fn session_channel(
    connector: &Connector,
    event: &str,
) -> mpsc::UnboundedReceiver<serde_json::Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    connector.on(event, move |event| {
        if let Event::Session { params, .. } = event {
            let _ = tx.send(params.clone());
        }
    });
    rx
}

#[tokio::test]
async fn test_full_session_e2e() {
    let bridge = start_bridge().await;

    // dApp side.
    let dapp = Connector::new(
        ConnectorConfig::bridge(&bridge, meta("dapp")),
        Some(Box::new(MemoryStore::new())),
    )
    .expect("dapp connector");
    let mut dapp_connects = session_channel(&dapp, "connect");
    dapp.connect().await.expect("dapp connect");
    dapp.create_session(Some(1)).await.expect("create session");
    let uri = dapp.handshake_uri().expect("handshake uri").to_string();
    assert!(dapp.pending());

    // Wallet side, joining via the URI.
    let wallet = Connector::new(
        ConnectorConfig::uri(uri, meta("wallet")),
        Some(Box::new(MemoryStore::new())),
    )
    .expect("wallet connector");
    let mut wallet_handshakes = request_channel(&wallet, "wc_sessionRequest");
    let mut wallet_calls = request_channel(&wallet, "call_request");
    wallet.connect().await.expect("wallet connect");

    // The bridge retained the handshake request published before the
    // wallet subscribed; the wallet sees it after its automatic key
    // rotation completes.
    let handshake = timeout(WAIT, wallet_handshakes.recv())
        .await
        .expect("handshake timed out")
        .expect("handshake channel closed");
    assert_eq!(handshake.method, "wc_sessionRequest");
    assert_eq!(wallet.peer_meta().expect("peer meta").name, "dapp");

    // Both sides already swapped to the rotated key.
    assert_eq!(wallet.session().key, dapp.session().key);

    // Approve.
    wallet
        .approve_session(SessionStatus {
            chain_id: 1,
            accounts: vec!["0xabc".into()],
        })
        .await
        .expect("approve session");
    assert!(wallet.connected());

    let connect_params = timeout(WAIT, dapp_connects.recv())
        .await
        .expect("connect event timed out")
        .expect("connect channel closed");
    assert_eq!(connect_params[0]["chainId"], 1);
    assert_eq!(connect_params[0]["accounts"][0], "0xabc");
    assert!(dapp.connected());
    assert_eq!(dapp.peer_meta().expect("peer meta").name, "wallet");

    // Call round-trip.
    let call = dapp.send_transaction(json!({"to": "0x1", "value": "0x0"}));
    let respond = async {
        let request = timeout(WAIT, wallet_calls.recv())
            .await
            .expect("call timed out")
            .expect("call channel closed");
        assert_eq!(request.method, "eth_sendTransaction");
        wallet
            .approve_request(request.id, json!("0xdeadbeef"))
            .await
            .expect("approve request");
    };
    let (result, ()) = tokio::join!(call, respond);
    assert_eq!(result.expect("call failed"), json!("0xdeadbeef"));

    // On-demand rotation from the dApp, then another call under the
    // fresh key.
    let old_key = dapp.session().key;
    dapp.exchange_key().await.expect("exchange key");
    assert_ne!(dapp.session().key, old_key);
    assert_eq!(dapp.session().key, wallet.session().key);

    let call = dapp.sign_message(json!(["0xabc", "hello"]));
    let respond = async {
        let request = timeout(WAIT, wallet_calls.recv())
            .await
            .expect("call timed out")
            .expect("call channel closed");
        assert_eq!(request.method, "eth_sign");
        wallet
            .approve_request(request.id, json!("0xsigned"))
            .await
            .expect("approve request");
    };
    let (result, ()) = tokio::join!(call, respond);
    assert_eq!(result.expect("call failed"), json!("0xsigned"));

    // Kill from the wallet; the dApp observes the disconnect.
    let mut dapp_disconnects = session_channel(&dapp, "disconnect");
    wallet
        .kill_session(Some("bye".into()))
        .await
        .expect("kill session");
    assert!(!wallet.connected());

    let disconnect_params = timeout(WAIT, dapp_disconnects.recv())
        .await
        .expect("disconnect event timed out")
        .expect("disconnect channel closed");
    assert_eq!(disconnect_params[0]["message"], "bye");
    assert!(!dapp.connected());

    dapp.close().await;
    wallet.close().await;
}

#[tokio::test]
async fn test_rejected_session_e2e() {
    let bridge = start_bridge().await;

    let dapp = Connector::new(
        ConnectorConfig::bridge(&bridge, meta("dapp")),
        Some(Box::new(MemoryStore::new())),
    )
    .expect("dapp connector");
    let mut dapp_disconnects = session_channel(&dapp, "disconnect");
    dapp.connect().await.expect("dapp connect");
    dapp.create_session(None).await.expect("create session");
    let uri = dapp.handshake_uri().expect("handshake uri").to_string();

    let wallet = Connector::new(ConnectorConfig::uri(uri, meta("wallet")), None)
        .expect("wallet connector");
    let mut wallet_handshakes = request_channel(&wallet, "wc_sessionRequest");
    wallet.connect().await.expect("wallet connect");

    timeout(WAIT, wallet_handshakes.recv())
        .await
        .expect("handshake timed out")
        .expect("handshake channel closed");
    wallet
        .reject_session(Some("not today".into()))
        .await
        .expect("reject session");

    let disconnect_params = timeout(WAIT, dapp_disconnects.recv())
        .await
        .expect("disconnect event timed out")
        .expect("disconnect channel closed");
    assert_eq!(disconnect_params[0]["message"], "not today");
    assert!(!dapp.connected());
    assert!(!dapp.pending());

    dapp.close().await;
    wallet.close().await;
}
