//! The session connection: lifecycle, request correlation, authentication.
//!
//! [`SessionConnection`] is a cheap, cloneable handle. All clones share one
//! state machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──request_qr_code / request_pairing_code / resume──▶ Authenticating
//!      ▲                        │                                                              │
//!      │                        └──────────────── disconnect / close ──────────────┐           │ auth_success
//!      │                                                                           ▼           ▼
//!      └────────────────────────────── disconnect / close ───────────────────── Connected ◀────┘
//! ```
//!
//! One reader task per open transport feeds inbound frames to the
//! dispatcher in wire order. Each transport is tagged with a generation;
//! events from a transport that has since been replaced or closed are
//! ignored.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use tether_proto::{
    Codec, Credentials, InboundEnvelope, OutboundRequest, RequestKind, ServerCredentials,
    TagGenerator,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthMethod, Authenticator};
use crate::dispatch::MessageDispatcher;
use crate::errors::ClientError;
use crate::events::{Event, EventBus, EventStream};
use crate::registry::{PendingGuard, RequestRegistry};
use crate::transport::{ABNORMAL_CLOSURE, Transport, TransportEvent, TransportFactory, WebSocketTransport};
use crate::{Config, keepalive, lock, reconnect};

// ─── ConnectionState ──────────────────────────────────────────────────────────

/// Where a [`SessionConnection`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected   => "disconnected",
            Self::Connecting     => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected      => "connected",
        })
    }
}

// ─── Internal state ───────────────────────────────────────────────────────────

type SharedTransport = Arc<tokio::sync::Mutex<Box<dyn Transport>>>;
type AuthResult = Result<Credentials, ClientError>;

/// One open transport and the task reading it.
struct Link {
    generation: u64,
    transport:  SharedTransport,
    reader:     Option<JoinHandle<()>>,
}

/// A QR or pairing-code authentication waiting for its `auth_success`.
struct ActiveAuth {
    method:      AuthMethod,
    credentials: Credentials,
    tx:          oneshot::Sender<AuthResult>,
}

struct Session {
    state:           ConnectionState,
    link:            Option<Link>,
    credentials:     Option<Credentials>,
    auth:            Option<ActiveAuth>,
    auth_rx:         Option<oneshot::Receiver<AuthResult>>,
    keepalive:       Option<CancellationToken>,
    codec:           Arc<Codec>,
    connected_since: Option<DateTime<Utc>>,
}

/// What a teardown took off the session.
struct Detached {
    link: Option<Link>,
    was:  ConnectionState,
}

pub(crate) struct Inner {
    pub(crate) config:             Config,
    factory:                       Box<dyn TransportFactory>,
    session:                       Mutex<Session>,
    pub(crate) registry:           RequestRegistry,
    tags:                          TagGenerator,
    pub(crate) events:             EventBus,
    /// Bumped on every open and every teardown; a link is live only while
    /// its generation is current.
    generation:                    AtomicU64,
    pub(crate) connecting:         AtomicBool,
    pub(crate) reconnecting:       AtomicBool,
    pub(crate) reconnect_attempts: AtomicU32,
    pub(crate) supervisor:         Mutex<Option<CancellationToken>>,
}

impl Inner {
    fn begin_connect(&self, op: &str) -> Result<ConnectGuard<'_>, ClientError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::illegal(format!("{op}: a connect is already in flight")));
        }
        Ok(ConnectGuard(&self.connecting))
    }

    pub(crate) fn stop_supervisor(&self) {
        if let Some(token) = lock(&self.supervisor).take() {
            token.cancel();
        }
    }
}

/// Clears the in-flight flag when a connect finishes, however it finishes.
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─── SessionConnection ────────────────────────────────────────────────────────

/// A persistent, authenticated session with the server.
///
/// Cloning is cheap — all clones share the same connection.
#[derive(Clone)]
pub struct SessionConnection {
    inner: Arc<Inner>,
}

impl SessionConnection {
    /// A connection that talks WebSocket to `config.url`.
    pub fn new(config: Config) -> Self {
        let factory = WebSocketTransport::factory(config.url.clone());
        Self::with_transport(config, factory)
    }

    /// A connection whose transports come from `factory`.
    pub fn with_transport(config: Config, factory: impl TransportFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory:            Box::new(factory),
                session:            Mutex::new(Session {
                    state:           ConnectionState::Disconnected,
                    link:            None,
                    credentials:     None,
                    auth:            None,
                    auth_rx:         None,
                    keepalive:       None,
                    codec:           Arc::new(Codec::plain()),
                    connected_since: None,
                }),
                registry:           RequestRegistry::new(),
                tags:               TagGenerator::new(),
                events:             EventBus::default(),
                generation:         AtomicU64::new(0),
                connecting:         AtomicBool::new(false),
                reconnecting:       AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                supervisor:         Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.session).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A copy of the current credentials: partial while a QR or pairing-code
    /// challenge is outstanding, complete once authenticated.
    pub fn credentials(&self) -> Option<Credentials> {
        let s = lock(&self.inner.session);
        s.auth.as_ref()
            .map(|a| a.credentials.clone())
            .or_else(|| s.credentials.clone())
    }

    /// Reconnect attempts made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    /// When the current session became `Connected`.
    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.session).connected_since
    }

    /// `true` while the reconnect supervisor is running.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    /// Receive every [`Event`] emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    pub(crate) fn codec(&self) -> Arc<Codec> {
        lock(&self.inner.session).codec.clone()
    }

    // ── Connect ────────────────────────────────────────────────────────────

    /// Open the transport and bootstrap the session.
    ///
    /// With resumable credentials (held in memory, or loaded from the
    /// configured store) this resumes straight to `Connected`. Otherwise it
    /// emits [`Event::AuthMethodRequired`] and stays `Connecting` until the
    /// caller picks a strategy.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.inner.begin_connect("connect")?;
        self.inner.stop_supervisor();

        let held = lock(&self.inner.session).credentials.clone();
        let stored = match held {
            Some(c) => Some(c),
            None => {
                let store = &self.inner.config.credential_store;
                let loaded = store.load()
                    .map_err(|e| ClientError::Storage(format!("{}: {e}", store.name())))?;
                if let Some(c) = &loaded {
                    tracing::info!("[tether] Loaded credentials from {} store", store.name());
                    lock(&self.inner.session).credentials = Some(c.clone());
                }
                loaded
            }
        };
        let resumable = stored.filter(Credentials::is_resumable);

        self.open_link(resumable.is_some()).await?;
        match resumable {
            Some(creds) => self.resume(creds).await.map(|_| ()),
            None => {
                tracing::info!("[tether] No stored credentials, waiting for an auth method");
                self.inner.events.emit(Event::AuthMethodRequired);
                Ok(())
            }
        }
    }

    /// Open the transport and authenticate with `creds` in one step.
    ///
    /// Once presented, `creds` become the connection's credentials and are
    /// what automatic reconnects use.
    pub async fn connect_with_credentials(&self, creds: Credentials) -> Result<(), ClientError> {
        let _guard = self.inner.begin_connect("connect_with_credentials")?;
        self.inner.stop_supervisor();
        self.establish(creds).await.map(|_| ())
    }

    pub(crate) async fn reconnect_with(&self, creds: Credentials) -> Result<(), ClientError> {
        let _guard = self.inner.begin_connect("reconnect")?;
        self.establish(creds).await.map(|_| ())
    }

    async fn establish(&self, creds: Credentials) -> Result<Credentials, ClientError> {
        if creds.is_empty() {
            return Err(ClientError::Authentication("credentials carry no key material".into()));
        }
        self.open_link(true).await?;
        self.resume(creds).await
    }

    /// Open a fresh transport, start its reader and send `init`.
    async fn open_link(&self, resume: bool) -> Result<u64, ClientError> {
        let generation = {
            let mut s = lock(&self.inner.session);
            if s.link.is_some() {
                return Err(ClientError::illegal(format!("connect while {}", s.state)));
            }
            s.state   = ConnectionState::Connecting;
            s.codec   = Arc::new(Codec::plain());
            s.auth    = None;
            s.auth_rx = None;
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.inner.events.emit(Event::Connecting);
        tracing::info!("[tether] Connecting to {} …", self.inner.config.url);

        let mut transport = self.inner.factory.create();
        let rx = match transport.open().await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!("[tether] Transport open failed: {e}");
                self.abort_link(generation, &e).await;
                return Err(e);
            }
        };

        let transport: SharedTransport = Arc::new(tokio::sync::Mutex::new(transport));
        let accepted = {
            let mut s = lock(&self.inner.session);
            if self.inner.generation.load(Ordering::SeqCst) == generation {
                let reader = tokio::spawn(read_loop(Arc::downgrade(&self.inner), generation, rx));
                s.link = Some(Link { generation, transport: transport.clone(), reader: Some(reader) });
                true
            } else {
                false
            }
        };
        if !accepted {
            // Disconnected while the transport was opening.
            transport.lock().await.close().await;
            return Err(ClientError::ConnectionClosed);
        }

        let init = OutboundRequest::empty(RequestKind::Init)
            .field("clientName", self.inner.config.client_name.clone())
            .field("version", env!("CARGO_PKG_VERSION"))
            .field("resume", resume);
        if let Err(e) = self.send_request(init, None).await {
            tracing::warn!("[tether] init failed: {e}");
            self.abort_link(generation, &e).await;
            return Err(e);
        }
        tracing::debug!("[tether] init ✓  (generation {generation})");
        Ok(generation)
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Send a request and wait for the response carrying its tag.
    ///
    /// A tag is allocated if `req` has none. Fails with
    /// [`ClientError::RequestTimeout`] after `timeout` (default: the
    /// configured request timeout), [`ClientError::Server`] if the response
    /// carries an error, and [`ClientError::ConnectionClosed`] if the
    /// connection drops first.
    pub async fn send_request(
        &self,
        mut req: OutboundRequest,
        timeout: Option<Duration>,
    ) -> Result<InboundEnvelope, ClientError> {
        let tag = req.tag.get_or_insert_with(|| self.inner.tags.next()).clone();
        let (transport, codec, rx) = {
            // Registered under the session lock: a teardown either sees the
            // entry and drains it, or has already taken the link.
            let s = lock(&self.inner.session);
            let (transport, codec) = link_of(&s, req.kind)?;
            (transport, codec, self.inner.registry.register(&tag, req.kind)?)
        };
        let mut guard = PendingGuard::new(&self.inner.registry, &tag);

        let frame = codec.encode(&req)?;
        transport.lock().await.send(frame).await?;
        tracing::trace!("[tether] → {} {tag}", req.kind);

        let after = timeout.unwrap_or(self.inner.config.request_timeout);
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(reply)) => {
                guard.disarm();
                reply
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(ClientError::ConnectionClosed)
            }
            Err(_) => {
                tracing::debug!("[tether] {} {tag} timed out after {after:?}", req.kind);
                Err(ClientError::RequestTimeout { tag: tag.clone(), after })
            }
        }
    }

    /// Send without waiting for a response. Returns the tag used.
    pub async fn send(&self, mut req: OutboundRequest) -> Result<String, ClientError> {
        let (transport, codec) = self.link_for(req.kind)?;
        let tag = req.tag.get_or_insert_with(|| self.inner.tags.next()).clone();
        let frame = codec.encode(&req)?;
        transport.lock().await.send(frame).await?;
        Ok(tag)
    }

    fn link_for(&self, kind: RequestKind) -> Result<(SharedTransport, Arc<Codec>), ClientError> {
        link_of(&lock(&self.inner.session), kind)
    }

    pub(crate) fn resolve_response(&self, env: InboundEnvelope) -> Result<(), InboundEnvelope> {
        self.inner.registry.resolve(env)
    }

    // ── Authentication ─────────────────────────────────────────────────────

    /// Start QR authentication. Returns the QR string, which is also
    /// emitted as [`Event::Qr`].
    pub async fn request_qr_code(&self) -> Result<String, ClientError> {
        self.start_challenge(AuthMethod::Qr, None).await
    }

    /// Start pairing-code authentication, optionally bound to a phone
    /// number. Returns the code, which is also emitted as
    /// [`Event::PairingCode`].
    pub async fn request_pairing_code(&self, phone_number: Option<&str>) -> Result<String, ClientError> {
        self.start_challenge(AuthMethod::PairingCode, phone_number).await
    }

    /// Wait for the outstanding QR or pairing-code challenge to complete.
    ///
    /// Legal once the challenge has been issued (`Authenticating`). If the
    /// challenge already concluded, its outcome is returned straight away.
    /// Only one caller gets the outcome; a second call, or a call made before
    /// the challenge response arrived, fails with [`ClientError::IllegalState`].
    pub async fn wait_for_authentication(&self) -> Result<Credentials, ClientError> {
        let rx = {
            let mut s = lock(&self.inner.session);
            if s.state == ConnectionState::Connecting && s.auth.is_some() {
                return Err(ClientError::illegal(
                    "wait_for_authentication before the challenge was issued",
                ));
            }
            match s.auth_rx.take() {
                Some(rx) => rx,
                None => {
                    return Err(ClientError::illegal(format!(
                        "wait_for_authentication while {} with no challenge outstanding", s.state
                    )));
                }
            }
        };
        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Drive `auth` from `initiate` through `await_completion`.
    pub async fn authenticate<A>(&self, auth: &mut A) -> Result<Credentials, ClientError>
    where
        A: Authenticator + ?Sized,
    {
        auth.initiate(self).await?;
        auth.await_completion(self).await
    }

    async fn start_challenge(&self, method: AuthMethod, phone_number: Option<&str>) -> Result<String, ClientError> {
        self.check_can_challenge(method)?;

        let key_pair = self.inner.config.crypto.generate_key_pair()
            .map_err(|e| ClientError::Authentication(format!("key generation failed: {e}")))?;
        let partial = Credentials::from_key_pair(&key_pair);

        // Armed before the request goes out so an early auth_success is not lost.
        let (tx, rx) = oneshot::channel();
        {
            let mut s = lock(&self.inner.session);
            check_challenge_state(&s, method)?;
            s.auth    = Some(ActiveAuth { method, credentials: partial.clone(), tx });
            s.auth_rx = Some(rx);
        }

        let mut req = OutboundRequest::empty(method.request_kind())
            .field("publicKey", partial.public_key.clone());
        if let Some(phone) = phone_number {
            req = req.field("phoneNumber", phone);
        }

        let challenge = self.send_request(req, None).await.and_then(|resp| {
            method.challenge_from(&resp.data).ok_or_else(|| {
                ClientError::MalformedPayload(format!("{} response carries no challenge", method.request_kind()))
            })
        });
        let code = match challenge {
            Ok(code) => code,
            Err(e) => {
                self.disarm_auth(method);
                return Err(e);
            }
        };

        let announce = {
            let mut guard = lock(&self.inner.session);
            let s = &mut *guard;
            match s.auth.as_mut() {
                Some(a) if a.method == method => {
                    match method {
                        AuthMethod::Qr => a.credentials.qr_code = Some(code.clone()),
                        _              => a.credentials.pairing_code = Some(code.clone()),
                    }
                    s.state = ConnectionState::Authenticating;
                    true
                }
                // auth_success overtook the challenge response.
                _ if s.state == ConnectionState::Connected => false,
                _ => return Err(ClientError::ConnectionClosed),
            }
        };

        if announce {
            tracing::info!("[tether] {method} challenge issued, waiting for the primary device …");
            self.inner.events.emit(match method {
                AuthMethod::Qr => Event::Qr(code.clone()),
                _              => Event::PairingCode(code.clone()),
            });
        }
        Ok(code)
    }

    fn check_can_challenge(&self, method: AuthMethod) -> Result<(), ClientError> {
        check_challenge_state(&lock(&self.inner.session), method)
    }

    fn disarm_auth(&self, method: AuthMethod) {
        let mut s = lock(&self.inner.session);
        if s.auth.as_ref().is_some_and(|a| a.method == method) {
            s.auth    = None;
            s.auth_rx = None;
        }
    }

    /// Present `creds` on the open transport and wait for the verdict.
    ///
    /// On rejection or timeout the transport is closed and the connection
    /// returns to `Disconnected`.
    pub(crate) async fn resume(&self, creds: Credentials) -> Result<Credentials, ClientError> {
        let req = self.auth_request(&creds)?;
        let generation = {
            let mut s = lock(&self.inner.session);
            let Some(link) = &s.link else {
                return Err(ClientError::illegal(format!("resume while {}", s.state)));
            };
            let generation = link.generation;
            if s.auth.is_some() {
                return Err(ClientError::illegal("resume: another authentication is in progress"));
            }
            s.state       = ConnectionState::Authenticating;
            s.credentials = Some(creds.clone());
            generation
        };
        tracing::info!("[tether] Resuming session …");

        let verdict = match self.send_request(req, Some(self.inner.config.auth_timeout)).await {
            Ok(resp) => {
                let mut creds = creds;
                creds.merge(server_fields(&resp));
                let live = {
                    let mut s = lock(&self.inner.session);
                    let live = s.link.as_ref().is_some_and(|l| l.generation == generation)
                        && s.state == ConnectionState::Authenticating;
                    if live {
                        s.state       = ConnectionState::Connected;
                        s.credentials = Some(creds.clone());
                    }
                    live
                };
                if live {
                    Ok(creds)
                } else {
                    Err(ClientError::Authentication("connection closed during resume".into()))
                }
            }
            Err(ClientError::RequestTimeout { after, .. }) => {
                Err(ClientError::Authentication(format!("no answer to auth within {after:?}")))
            }
            Err(e @ ClientError::Authentication(_)) => Err(e),
            Err(e) => Err(ClientError::Authentication(e.to_string())),
        };

        match verdict {
            Ok(creds) => {
                tracing::info!("[tether] Session resumed ✓");
                self.on_connected(&creds);
                Ok(creds)
            }
            Err(e) => {
                tracing::warn!("[tether] Resume failed: {e}");
                self.inner.events.emit(Event::AuthFailure(e.to_string()));
                self.abort_link(generation, &e).await;
                Err(e)
            }
        }
    }

    fn auth_request(&self, creds: &Credentials) -> Result<OutboundRequest, ClientError> {
        let unusable = |e: tether_proto::ProtoError| {
            ClientError::Authentication(format!("stored credentials are unusable: {e}"))
        };
        let mut req = OutboundRequest::empty(RequestKind::Auth)
            .field("publicKey", creds.public_key.clone())
            .field("serverPublicKey", creds.server_public_key.clone());

        if let Some(session) = &creds.session {
            req = req.field("session", session.clone());
            if let Some(server) = creds.server_public_key_bytes().map_err(unusable)? {
                let private = creds.private_key_bytes().map_err(unusable)?;
                let sig = self.inner.config.crypto.sign(&private, &server, session.as_bytes())
                    .map_err(|e| ClientError::Authentication(format!("signing failed: {e}")))?;
                req = req.field("signature", B64.encode(sig));
            }
        }
        Ok(req)
    }

    /// `auth_success` arrived for the outstanding challenge.
    pub(crate) fn complete_auth(&self, server: ServerCredentials) {
        let done = {
            let mut s = lock(&self.inner.session);
            match s.auth.take() {
                Some(auth) if s.link.is_some() => {
                    let mut creds = auth.credentials;
                    creds.merge(server);
                    s.credentials = Some(creds.clone());
                    s.state       = ConnectionState::Connected;
                    Some((auth.method, creds, auth.tx))
                }
                _ => None,
            }
        };
        let Some((method, creds, tx)) = done else {
            tracing::debug!("[tether] auth_success with no challenge outstanding, ignored");
            return;
        };
        tracing::info!("[tether] Authenticated ✓  via {method}");
        self.on_connected(&creds);
        let _ = tx.send(Ok(creds));
    }

    /// `auth_failure` arrived for the outstanding challenge.
    pub(crate) fn fail_auth(&self, reason: String) {
        let auth = {
            let mut s = lock(&self.inner.session);
            let auth = s.auth.take();
            if auth.is_some() && s.state == ConnectionState::Authenticating {
                s.state = ConnectionState::Connecting;
            }
            auth
        };
        let Some(auth) = auth else {
            tracing::debug!("[tether] auth_failure with no challenge outstanding, ignored");
            return;
        };
        tracing::warn!("[tether] {} authentication rejected: {reason}", auth.method);
        self.inner.events.emit(Event::AuthFailure(reason.clone()));
        let _ = auth.tx.send(Err(ClientError::Authentication(reason)));
    }

    /// Common tail of every successful authentication.
    fn on_connected(&self, creds: &Credentials) {
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        let codec = if self.inner.config.encrypt_payloads {
            match Codec::encrypted(self.inner.config.crypto.clone(), creds) {
                Ok(c) => Some(Arc::new(c)),
                Err(e) => {
                    tracing::warn!("[tether] Staying on plain frames: {e}");
                    None
                }
            }
        } else {
            None
        };

        let token = CancellationToken::new();
        {
            let mut s = lock(&self.inner.session);
            if let Some(old) = s.keepalive.replace(token.clone()) {
                old.cancel();
            }
            if let Some(c) = codec {
                s.codec = c;
            }
            s.connected_since = Some(Utc::now());
        }
        keepalive::spawn(Arc::downgrade(&self.inner), self.inner.config.keep_alive_interval, token);

        let store = &self.inner.config.credential_store;
        match store.save(creds) {
            Ok(()) => tracing::debug!("[tether] Credentials saved to {} store", store.name()),
            Err(e) => tracing::warn!("[tether] Saving credentials to {} store failed: {e}", store.name()),
        }

        self.inner.events.emit(Event::Authenticated(creds.clone()));
        self.inner.events.emit(Event::Ready);
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    /// Close the connection. Idempotent.
    ///
    /// Pending requests fail with [`ClientError::ConnectionClosed`], an
    /// outstanding challenge is rejected, keepalive and any reconnect
    /// supervisor stop. No automatic reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.stop_supervisor();
        let Some(detached) = self.detach(None, ClientError::ConnectionClosed) else { return };
        if let Some(link) = detached.link {
            close_link(link, true).await;
        }
        tracing::info!("[tether] Disconnected");
        self.inner.events.emit(Event::Disconnected { code: 1000, reason: "client disconnect".into() });
    }

    /// Write the current credentials to the configured store.
    ///
    /// Successful authentications already do this; call it after swapping
    /// stores or to retry a save that failed.
    pub fn save_credentials(&self) -> Result<(), ClientError> {
        let creds = lock(&self.inner.session).credentials.clone()
            .ok_or_else(|| ClientError::illegal("save_credentials: no credentials held"))?;
        let store = &self.inner.config.credential_store;
        store.save(&creds).map_err(|e| ClientError::Storage(format!("{}: {e}", store.name())))?;
        tracing::info!("[tether] Credentials saved to {} store", store.name());
        Ok(())
    }

    /// Disconnect and forget the credentials, in memory and in the store.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.disconnect().await;
        lock(&self.inner.session).credentials = None;
        let store = &self.inner.config.credential_store;
        store.delete().map_err(|e| ClientError::Storage(format!("{}: {e}", store.name())))?;
        tracing::info!("[tether] Logged out ✓");
        Ok(())
    }

    /// A connect or resume failed; drop its transport without reconnecting.
    async fn abort_link(&self, generation: u64, cause: &ClientError) {
        let Some(detached) = self.detach(Some(generation), cause.clone()) else { return };
        if let Some(link) = detached.link {
            close_link(link, true).await;
        }
        self.inner.events.emit(Event::ConnectionFailed(cause.to_string()));
    }

    /// The transport of `generation` closed without being asked to.
    async fn on_transport_closed(&self, generation: u64, code: u16, reason: String) {
        let err = ClientError::Authentication(format!("connection closed during authentication ({code}: {reason})"));
        let Some(detached) = self.detach(Some(generation), err) else { return };
        if let Some(link) = detached.link {
            close_link(link, false).await;
        }
        tracing::warn!("[tether] Connection lost ({code}: {reason})");
        self.inner.events.emit(Event::Disconnected { code, reason });

        if !self.inner.config.restart_on_connection_lost || detached.was == ConnectionState::Disconnected {
            return;
        }
        let resumable = lock(&self.inner.session).credentials.clone().filter(Credentials::is_resumable);
        match resumable {
            Some(creds) => {
                reconnect::spawn(self, creds);
            }
            None => tracing::info!("[tether] No resumable credentials, not reconnecting"),
        }
    }

    /// Take the link off the session and fail everything that depended on it.
    ///
    /// With `Some(generation)` this only acts if that generation is still
    /// current; `None` always acts. Returns `None` if there was nothing to
    /// tear down.
    fn detach(&self, generation: Option<u64>, auth_err: ClientError) -> Option<Detached> {
        let (detached, auth) = {
            let mut s = lock(&self.inner.session);
            match generation {
                Some(g) => {
                    self.inner.generation
                        .compare_exchange(g, g + 1, Ordering::SeqCst, Ordering::SeqCst)
                        .ok()?;
                }
                None => {
                    self.inner.generation.fetch_add(1, Ordering::SeqCst);
                }
            }
            if s.state == ConnectionState::Disconnected && s.link.is_none() {
                return None;
            }
            let link = s.link.take();
            let was  = std::mem::replace(&mut s.state, ConnectionState::Disconnected);
            if let Some(token) = s.keepalive.take() {
                token.cancel();
            }
            s.codec           = Arc::new(Codec::plain());
            s.connected_since = None;
            (Detached { link, was }, s.auth.take())
        };

        let failed = self.inner.registry.drain(&ClientError::ConnectionClosed);
        if failed > 0 {
            tracing::debug!("[tether] Failed {failed} pending request(s)");
        }
        if let Some(auth) = auth {
            let _ = auth.tx.send(Err(auth_err));
        }
        Some(detached)
    }
}

impl std::fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnection")
            .field("state", &self.state())
            .field("pending_requests", &self.pending_requests())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn check_challenge_state(s: &Session, method: AuthMethod) -> Result<(), ClientError> {
    if s.state != ConnectionState::Connecting || s.link.is_none() {
        return Err(ClientError::illegal(format!(
            "{} requires a connecting session, state is {}", method.request_kind(), s.state
        )));
    }
    if let Some(active) = &s.auth {
        return Err(ClientError::illegal(format!(
            "{} authentication already in progress", active.method
        )));
    }
    Ok(())
}

fn link_of(s: &Session, kind: RequestKind) -> Result<(SharedTransport, Arc<Codec>), ClientError> {
    match &s.link {
        Some(link) => Ok((link.transport.clone(), s.codec.clone())),
        None => Err(ClientError::illegal(format!("cannot send {kind} while {}", s.state))),
    }
}

/// Server-issued fields carried by an `auth` response.
fn server_fields(env: &InboundEnvelope) -> ServerCredentials {
    serde_json::from_value(env.credentials_body().clone()).unwrap_or_default()
}

async fn close_link(link: Link, abort_reader: bool) {
    link.transport.lock().await.close().await;
    if abort_reader {
        if let Some(reader) = link.reader {
            reader.abort();
        }
    }
}

/// Feed one transport's events through the dispatcher, in order.
async fn read_loop(inner: Weak<Inner>, generation: u64, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(strong) = inner.upgrade() else { return };
        if strong.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let conn = SessionConnection::from_inner(strong);
        match event {
            TransportEvent::Opened => tracing::debug!("[tether] Transport open (generation {generation})"),
            TransportEvent::Message(raw) => {
                MessageDispatcher::new(&conn).dispatch(&raw);
            }
            TransportEvent::Error(e) => tracing::warn!("[tether] Transport error: {e}"),
            TransportEvent::Closed { code, reason } => {
                conn.on_transport_closed(generation, code, reason).await;
                return;
            }
        }
    }
    if let Some(strong) = inner.upgrade() {
        SessionConnection::from_inner(strong)
            .on_transport_closed(generation, ABNORMAL_CLOSURE, "transport stream ended".into())
            .await;
    }
}
