//! # tether-client
//!
//! Async client for a persistent, authenticated messaging session.
//!
//! ## Features
//! - One long-lived WebSocket per [`SessionConnection`], opened on demand
//! - Tagged request/response correlation with per-request timeouts
//! - QR-code, pairing-code and stored-credential authentication
//! - Typed push events: messages, revokes, presence, group updates
//! - Keepalive pings while the session is live
//! - Automatic reconnect with a pluggable [`ReconnectPolicy`]
//! - Pluggable [`CredentialStore`]: JSON file or in-memory
//!
//! ```rust,no_run
//! use tether_client::{Config, Event, SessionConnection};
//!
//! # async fn run() -> Result<(), tether_client::ClientError> {
//! let conn = SessionConnection::new(Config::default());
//! let mut events = conn.subscribe();
//! conn.connect().await?;
//!
//! while let Some(ev) = events.next().await {
//!     match ev {
//!         Event::AuthMethodRequired => { conn.request_qr_code().await?; }
//!         Event::Qr(code)           => println!("scan: {code}"),
//!         Event::Message(m)         => println!("{}: {}", m.from, m.body),
//!         _ => {}
//!     }
//! }
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod auth;
mod connection;
mod dispatch;
mod errors;
mod events;
mod keepalive;
mod reconnect;
mod registry;
pub mod store;
pub mod transport;

pub use auth::{AuthMethod, Authenticator, Challenge, PairingCodeAuth, QrAuth, ResumeAuth};
pub use connection::{ConnectionState, SessionConnection};
pub use dispatch::Routed;
pub use errors::ClientError;
pub use events::{Event, EventStream};
pub use reconnect::{FixedInterval, NoReconnect, ReconnectContext, ReconnectPolicy};
pub use store::{CredentialStore, InMemoryStore, JsonFileStore};
pub use transport::{Transport, TransportEvent, TransportFactory, WebSocketTransport};

pub use tether_crypto::{CryptoProvider, KeyPair, X25519Provider};
pub use tether_proto::{
    Credentials, GroupAction, GroupUpdatePayload, InboundEnvelope, MessageKind, MessagePayload,
    OutboundRequest, PresenceKind, PresencePayload, RequestKind, RevokePayload,
};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;

/// Lock a std mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`SessionConnection`].
#[derive(Clone)]
pub struct Config {
    /// Server endpoint (`ws://` or `wss://`).
    pub url:                        String,
    /// Sent in the `init` handshake.
    pub client_name:                String,
    /// Reconnect after an unexpected close (default: true).
    pub restart_on_connection_lost: bool,
    /// Attempts before the default policy gives up (default: 5).
    pub max_reconnect_attempts:     u32,
    /// Pause before each attempt of the default policy (default: 3s).
    pub reconnect_interval:         Duration,
    /// How long a request waits for its response (default: 30s).
    pub request_timeout:            Duration,
    /// Ping period while connected; zero disables keepalive (default: 20s).
    pub keep_alive_interval:        Duration,
    /// How long a stored-credential resume may take (default: 30s).
    pub auth_timeout:               Duration,
    /// Encrypt frames once the server's public key is known (default: false).
    pub encrypt_payloads:           bool,
    /// Overrides the fixed-interval policy built from the two fields above.
    pub reconnect_policy:           Option<Arc<dyn ReconnectPolicy>>,
    /// Credential persistence (default: in-memory).
    pub credential_store:           Arc<dyn CredentialStore>,
    /// Key generation, signing and frame encryption.
    pub crypto:                     Arc<dyn CryptoProvider>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url:                        "wss://ws.tether.chat/session".into(),
            client_name:                format!("tether-client/{}", env!("CARGO_PKG_VERSION")),
            restart_on_connection_lost: true,
            max_reconnect_attempts:     5,
            reconnect_interval:         Duration::from_secs(3),
            request_timeout:            Duration::from_secs(30),
            keep_alive_interval:        Duration::from_secs(20),
            auth_timeout:               Duration::from_secs(30),
            encrypt_payloads:           false,
            reconnect_policy:           None,
            credential_store:           Arc::new(InMemoryStore::new()),
            crypto:                     Arc::new(X25519Provider::new()),
        }
    }
}

impl Config {
    /// The policy the reconnect supervisor consults.
    pub fn effective_reconnect_policy(&self) -> Arc<dyn ReconnectPolicy> {
        match &self.reconnect_policy {
            Some(p) => p.clone(),
            None => Arc::new(FixedInterval {
                max_attempts: self.max_reconnect_attempts,
                interval:     self.reconnect_interval,
            }),
        }
    }

    /// Parse a JSON config file on top of the defaults.
    pub fn from_json(raw: &str) -> Result<Self, ClientError> {
        let file: ConfigFile = serde_json::from_str(raw)
            .map_err(|e| ClientError::MalformedPayload(format!("config: {e}")))?;
        Ok(file.apply(Self::default()))
    }

    /// Load a JSON config file from disk on top of the defaults.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("client_name", &self.client_name)
            .field("restart_on_connection_lost", &self.restart_on_connection_lost)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("request_timeout", &self.request_timeout)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("auth_timeout", &self.auth_timeout)
            .field("encrypt_payloads", &self.encrypt_payloads)
            .field("credential_store", &self.credential_store.name())
            .finish_non_exhaustive()
    }
}

/// On-disk form of [`Config`]: camelCase keys, durations in milliseconds.
/// Every field is optional and falls back to the default.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub url:                        Option<String>,
    pub client_name:                Option<String>,
    pub restart_on_connection_lost: Option<bool>,
    pub max_reconnect_attempts:     Option<u32>,
    pub reconnect_interval:         Option<u64>,
    pub request_timeout:            Option<u64>,
    pub keep_alive_interval:        Option<u64>,
    pub auth_timeout:               Option<u64>,
    pub encrypt_payloads:           Option<bool>,
    /// Path of a JSON credential file; selects [`JsonFileStore`].
    pub credentials_path:           Option<String>,
}

impl ConfigFile {
    /// Overlay the fields that are set onto `base`.
    pub fn apply(self, mut base: Config) -> Config {
        let ms = Duration::from_millis;
        if let Some(v) = self.url                        { base.url = v; }
        if let Some(v) = self.client_name                { base.client_name = v; }
        if let Some(v) = self.restart_on_connection_lost { base.restart_on_connection_lost = v; }
        if let Some(v) = self.max_reconnect_attempts     { base.max_reconnect_attempts = v; }
        if let Some(v) = self.reconnect_interval         { base.reconnect_interval = ms(v); }
        if let Some(v) = self.request_timeout            { base.request_timeout = ms(v); }
        if let Some(v) = self.keep_alive_interval        { base.keep_alive_interval = ms(v); }
        if let Some(v) = self.auth_timeout               { base.auth_timeout = ms(v); }
        if let Some(v) = self.encrypt_payloads           { base.encrypt_payloads = v; }
        if let Some(p) = self.credentials_path {
            base.credential_store = Arc::new(JsonFileStore::new(p));
        }
        base
    }
}
