//! Event dispatcher.
//!
//! A flat table of `(event, callback)` entries. Keys are a request's
//! method name, `response:<id>` for responses, or the literal name of a
//! synthetic session event. Duplicate registrations fire multiple times,
//! supporting both specific-id and method-level observers. Requests that
//! match no listener fall back to the `call_request` sink.

use serde_json::Value;

use crate::rpc::{Request, Response};

/// Generic sink event for requests no listener claimed.
pub const CALL_REQUEST: &str = "call_request";

/// Session approved; params carry `{chainId, accounts}`.
pub const CONNECT: &str = "connect";

/// Session rejected, killed or remotely disconnected.
pub const DISCONNECT: &str = "disconnect";

/// Chain or accounts changed on an approved session.
pub const SESSION_UPDATE: &str = "session_update";

/// A dispatched occurrence: an inbound payload or a synthetic session
/// transition.
#[derive(Debug, Clone)]
pub enum Event {
    /// Inbound JSON-RPC request; listeners match on the method name.
    Request(Request),
    /// Inbound JSON-RPC response; listeners match on `response:<id>`.
    Response(Response),
    /// Synthetic session transition; listeners match on the event name.
    Session {
        /// Event name ([`CONNECT`], [`DISCONNECT`], [`SESSION_UPDATE`]).
        name: String,
        /// Event parameters, same positional-array convention as requests.
        params: Value,
    },
}

impl Event {
    /// The key listeners are matched against.
    pub fn key(&self) -> String {
        match self {
            Self::Request(request) => request.method.clone(),
            Self::Response(response) => format!("response:{}", response.id),
            Self::Session { name, .. } => name.clone(),
        }
    }
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

/// Listener table.
///
/// Callbacks run on the dispatching task and must not block; a callback
/// must not re-enter the table it is being dispatched from.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<(String, Callback)>,
}

impl EventDispatcher {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event key.
    pub fn on(&mut self, event: impl Into<String>, callback: impl Fn(&Event) + Send + Sync + 'static) {
        self.listeners.push((event.into(), Box::new(callback)));
    }

    /// Remove every callback registered for an event key.
    pub fn off(&mut self, event: &str) {
        self.listeners.retain(|(name, _)| name != event);
    }

    /// Invoke every callback matching the event's key, in registration
    /// order. Unmatched requests fall back to [`CALL_REQUEST`] listeners.
    /// Returns how many callbacks fired.
    pub fn dispatch(&self, event: &Event) -> usize {
        let key = event.key();
        let mut fired = 0;
        for (name, callback) in &self.listeners {
            if *name == key {
                callback(event);
                fired += 1;
            }
        }

        if fired == 0 {
            if let Event::Request(_) = event {
                for (name, callback) in &self.listeners {
                    if name == CALL_REQUEST {
                        callback(event);
                        fired += 1;
                    }
                }
            }
        }

        fired
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.listeners.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("EventDispatcher").field("listeners", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(method: &str) -> Event {
        Event::Request(Request::new(method, json!([])))
    }

    #[test]
    fn test_dispatch_matches_method() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        dispatcher.on("eth_sign", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&request("eth_sign")), 1);
        assert_eq!(dispatcher.dispatch(&request("eth_other")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_listeners_fire_multiple_times() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let seen = hits.clone();
            dispatcher.on("connect", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        let event = Event::Session {
            name: CONNECT.into(),
            params: json!([{"chainId": 1}]),
        };
        assert_eq!(dispatcher.dispatch(&event), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unmatched_request_falls_back_to_call_request() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        dispatcher.on(CALL_REQUEST, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.dispatch(&request("eth_sendTransaction")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matched_request_skips_fallback() {
        let mut dispatcher = EventDispatcher::new();
        let fallback_hits = Arc::new(AtomicUsize::new(0));
        let seen = fallback_hits.clone();
        dispatcher.on(CALL_REQUEST, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.on("eth_sign", |_| {});

        dispatcher.dispatch(&request("eth_sign"));
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_responses_never_fall_back() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        dispatcher.on(CALL_REQUEST, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let event = Event::Response(Response::result(42, json!("0x0")));
        assert_eq!(dispatcher.dispatch(&event), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_response_key_includes_id() {
        let event = Event::Response(Response::result(42, json!("0x0")));
        assert_eq!(event.key(), "response:42");
    }

    #[test]
    fn test_off_removes_all_entries_for_key() {
        let mut dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let seen = hits.clone();
            dispatcher.on("eth_sign", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        dispatcher.off("eth_sign");

        assert_eq!(dispatcher.dispatch(&request("eth_sign")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
