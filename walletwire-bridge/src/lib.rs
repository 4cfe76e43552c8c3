//! Topic pub/sub relay broker.
//!
//! Speaks the connector's frame protocol: JSON text messages
//! `{topic, type: "pub"|"sub", payload}`. A `sub` registers the
//! connection for a topic; a `pub` is forwarded verbatim to every other
//! subscriber of that topic. Publishes with no reachable subscriber are
//! retained and flushed to the next subscriber, so a handshake request
//! published before the wallet comes online is not lost.
//!
//! This is a development and test relay, not a production service: no
//! auth, no rate limiting, no persistence.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

/// Per-connection outbound queue depth.
const CLIENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BridgeFrame {
    topic: String,
    #[serde(rename = "type")]
    kind: String,
    /// Validated on parse; the broker forwards the raw frame text.
    #[allow(dead_code)]
    payload: String,
}

type Subscribers = Arc<DashMap<String, Vec<mpsc::Sender<String>>>>;
type Retained = Arc<DashMap<String, Vec<String>>>;

/// Accept connections on `listener` and relay frames until the listener
/// fails.
pub async fn run_bridge(listener: TcpListener) {
    let subscribers: Subscribers = Arc::new(DashMap::new());
    let retained: Retained = Arc::new(DashMap::new());

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let subscribers = subscribers.clone();
        let retained = retained.clone();
        tokio::spawn(async move {
            debug!(%peer_addr, "connection opened");
            if let Err(e) = handle_connection(stream, subscribers, retained).await {
                debug!(%peer_addr, error = %e, "connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    subscribers: Subscribers,
    retained: Retained,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE_DEPTH);
    let mut my_topics: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            Some(text) = rx.recv() => {
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore Ping, Pong, Binary
                    Some(Err(_)) => break,
                };

                let frame: BridgeFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed frame");
                        break;
                    }
                };

                match frame.kind.as_str() {
                    "sub" => {
                        subscribers
                            .entry(frame.topic.clone())
                            .or_default()
                            .push(tx.clone());
                        my_topics.push(frame.topic.clone());

                        // Flush frames published before this subscriber
                        // arrived.
                        if let Some((_, frames)) = retained.remove(&frame.topic) {
                            for retained_frame in frames {
                                let _ = tx.try_send(retained_frame);
                            }
                        }
                    }
                    "pub" => {
                        let mut delivered = false;
                        if let Some(subs) = subscribers.get(&frame.topic) {
                            for sub in subs.iter() {
                                // Never echo a publish back to its sender.
                                if sub.same_channel(&tx) {
                                    continue;
                                }
                                if sub.try_send(text.clone()).is_ok() {
                                    delivered = true;
                                }
                            }
                        }
                        if !delivered {
                            retained
                                .entry(frame.topic.clone())
                                .or_default()
                                .push(text);
                        }
                    }
                    other => {
                        warn!(kind = %other, "dropping frame with unknown type");
                        break;
                    }
                }
            }
        }
    }

    // Unregister this connection from every topic it subscribed.
    for topic in my_topics {
        if let Some(mut subs) = subscribers.get_mut(&topic) {
            subs.retain(|sub| !sub.same_channel(&tx));
        }
        subscribers.remove_if(&topic, |_, subs| subs.is_empty());
    }

    Ok(())
}
