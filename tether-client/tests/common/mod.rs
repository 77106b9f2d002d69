//! A scripted in-process server behind a [`Transport`].
//!
//! Every transport the factory hands out talks to the same [`MockServer`],
//! which records what the client sent and answers the bootstrap and auth
//! requests according to its script.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_client::{
    ClientError, Config, Credentials, Event, EventStream, InMemoryStore, KeyPair, Transport,
    TransportEvent,
};
use tokio::sync::mpsc;

pub const QR: &str = "2@mock-qr,client-ref";
pub const PAIRING_CODE: &str = "K7QX-P2ML";
pub const SESSION: &str = "sess-1";

/// The server's key pair; its public half is what auth hands out.
pub fn server_key_pair() -> KeyPair {
    KeyPair::from_private([42u8; 32])
}

pub fn server_public_key() -> String {
    Credentials::from_key_pair(&server_key_pair()).public_key
}

/// Credentials a previous run would have persisted.
pub fn resumable_credentials() -> Credentials {
    let mut c = Credentials::from_key_pair(&KeyPair::from_private([7u8; 32]));
    c.server_public_key = server_public_key();
    c.session = Some(SESSION.into());
    c
}

/// Fast timings, no keepalive, in-memory store.
pub fn config() -> Config {
    Config {
        url:                    "ws://mock".into(),
        max_reconnect_attempts: 3,
        reconnect_interval:     Duration::from_millis(100),
        request_timeout:        Duration::from_secs(5),
        keep_alive_interval:    Duration::ZERO,
        auth_timeout:           Duration::from_secs(2),
        credential_store:       Arc::new(InMemoryStore::new()),
        ..Config::default()
    }
}

/// Next event, failing the test if none arrives within a minute of (paused) time.
pub async fn next_event(events: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(60), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Every event already queued.
pub fn drain(events: &mut EventStream) -> Vec<Event> {
    std::iter::from_fn(|| events.try_next()).collect()
}

// ─── Script ───────────────────────────────────────────────────────────────────

/// How the server answers an `auth` request.
#[derive(Clone, Debug)]
pub enum AuthReply {
    Accept,
    Reject(String),
    Silent,
}

struct State {
    sent:       Vec<Value>,
    client:     Option<mpsc::UnboundedSender<TransportEvent>>,
    current:    usize,
    opens:      usize,
    fail_opens: u32,
    refuse_all: bool,
    auth:       AuthReply,
    muted:      HashSet<String>,
    failing:    HashMap<String, String>,
    hold:       bool,
    held:       Vec<Value>,
}

#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                sent:       Vec::new(),
                client:     None,
                current:    0,
                opens:      0,
                fail_opens: 0,
                refuse_all: false,
                auth:       AuthReply::Accept,
                muted:      HashSet::new(),
                failing:    HashMap::new(),
                hold:       false,
                held:       Vec::new(),
            })),
        }
    }

    pub fn factory(&self) -> impl Fn() -> Box<dyn Transport> + Send + Sync + 'static {
        let server = self.clone();
        move || Box::new(MockTransport { server: server.clone(), id: 0, open: false }) as Box<dyn Transport>
    }

    // ── Script knobs ───────────────────────────────────────────────────────

    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().unwrap().fail_opens = n;
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_all = refuse;
    }

    pub fn set_auth(&self, reply: AuthReply) {
        self.state.lock().unwrap().auth = reply;
    }

    /// Never answer requests of `kind`.
    pub fn mute(&self, kind: &str) {
        self.state.lock().unwrap().muted.insert(kind.to_string());
    }

    /// Answer requests of `kind` with an error.
    pub fn fail_kind(&self, kind: &str, error: &str) {
        self.state.lock().unwrap().failing.insert(kind.to_string(), error.to_string());
    }

    /// Queue responses instead of sending them.
    pub fn hold(&self, hold: bool) {
        self.state.lock().unwrap().hold = hold;
    }

    pub fn held(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }

    /// Send every queued response, newest first.
    pub fn release_reversed(&self) {
        let mut st = self.state.lock().unwrap();
        let held: Vec<_> = st.held.drain(..).rev().collect();
        for v in held {
            deliver(&st, &v);
        }
        st.hold = false;
    }

    // ── Server → client ────────────────────────────────────────────────────

    pub fn push(&self, frame: Value) {
        deliver(&self.state.lock().unwrap(), &frame);
    }

    pub fn push_raw(&self, raw: &str) {
        if let Some(tx) = &self.state.lock().unwrap().client {
            let _ = tx.send(TransportEvent::Message(raw.to_string()));
        }
    }

    /// Complete an outstanding QR / pairing-code challenge.
    pub fn approve(&self) {
        self.push(json!({
            "type": "auth_success",
            "data": { "serverPublicKey": server_public_key(), "session": SESSION }
        }));
    }

    pub fn reject(&self, reason: &str) {
        self.push(json!({ "type": "auth_failure", "data": { "reason": reason } }));
    }

    /// Close the current connection from the server side.
    pub fn drop_connection(&self, code: u16, reason: &str) {
        if let Some(tx) = self.state.lock().unwrap().client.take() {
            let _ = tx.send(TransportEvent::Closed { code, reason: reason.to_string() });
        }
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().client.is_some()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.state.lock().unwrap().sent.iter()
            .filter(|v| v["type"] == kind)
            .cloned()
            .collect()
    }

    // ── Request handling ───────────────────────────────────────────────────

    fn answer(&self, frame: Value) {
        let mut st = self.state.lock().unwrap();
        st.sent.push(frame.clone());

        let kind = frame["type"].as_str().unwrap_or_default().to_string();
        let tag  = frame["tag"].clone();
        if st.muted.contains(&kind) || kind == "ping" {
            return;
        }
        let reply = if let Some(err) = st.failing.get(&kind) {
            json!({ "tag": tag, "type": kind, "error": err })
        } else {
            match kind.as_str() {
                "init" => json!({ "tag": tag, "type": "init", "data": {} }),
                "request_qr" => json!({ "tag": tag, "type": kind, "data": { "qr": QR } }),
                "request_pairing_code" => json!({ "tag": tag, "type": kind, "data": { "code": PAIRING_CODE } }),
                "auth" => match &st.auth {
                    AuthReply::Accept => json!({
                        "tag": tag, "type": "auth",
                        "data": { "serverPublicKey": server_public_key(), "session": SESSION }
                    }),
                    AuthReply::Reject(reason) => json!({ "tag": tag, "type": "auth", "error": reason }),
                    AuthReply::Silent => return,
                },
                _ => json!({ "tag": tag, "type": kind, "data": { "echo": frame["data"] } }),
            }
        };

        if st.hold && kind != "init" && kind != "auth" {
            st.held.push(reply);
        } else {
            deliver(&st, &reply);
        }
    }
}

fn deliver(st: &State, frame: &Value) {
    if let Some(tx) = &st.client {
        let _ = tx.send(TransportEvent::Message(frame.to_string()));
    }
}

// ─── MockTransport ────────────────────────────────────────────────────────────

pub struct MockTransport {
    server: MockServer,
    id:     usize,
    open:   bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, ClientError> {
        let mut st = self.server.state.lock().unwrap();
        st.opens += 1;
        if st.refuse_all {
            return Err(ClientError::Transport("connection refused".into()));
        }
        if st.fail_opens > 0 {
            st.fail_opens -= 1;
            return Err(ClientError::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Opened);
        st.client  = Some(tx);
        st.current = st.opens;
        self.id    = st.opens;
        self.open  = true;
        Ok(rx)
    }

    async fn send(&mut self, payload: String) -> Result<(), ClientError> {
        if !self.open {
            return Err(ClientError::Transport("not open".into()));
        }
        let frame: Value = serde_json::from_str(&payload)
            .map_err(|e| ClientError::Transport(format!("mock got non-JSON frame: {e}")))?;
        self.server.answer(frame);
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut st = self.server.state.lock().unwrap();
            if st.current == self.id {
                st.client = None;
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
