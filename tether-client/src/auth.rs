//! Authentication strategies.
//!
//! Three ways into a live session share one contract: [`initiate`] sends
//! whatever the server needs and returns the challenge (if any) to show the
//! user; [`await_completion`] resolves once the server has accepted or
//! rejected it.
//!
//! | Strategy            | Challenge         | Completes on                 |
//! |---------------------|-------------------|------------------------------|
//! | [`QrAuth`]          | QR string         | `auth_success` push          |
//! | [`PairingCodeAuth`] | short code        | `auth_success` push          |
//! | [`ResumeAuth`]      | none              | the `auth` response itself   |
//!
//! Strategies hold no connection state of their own; everything goes through
//! the [`SessionConnection`] they are driven against.
//!
//! [`initiate`]: Authenticator::initiate
//! [`await_completion`]: Authenticator::await_completion

use async_trait::async_trait;
use serde_json::Value;
use tether_proto::{Credentials, RequestKind};

use crate::connection::SessionConnection;
use crate::errors::ClientError;

// ─── AuthMethod ───────────────────────────────────────────────────────────────

/// Which strategy is driving authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Qr,
    PairingCode,
    Resume,
}

impl AuthMethod {
    /// The request that starts this method.
    pub fn request_kind(self) -> RequestKind {
        match self {
            Self::Qr          => RequestKind::RequestQr,
            Self::PairingCode => RequestKind::RequestPairingCode,
            Self::Resume      => RequestKind::Auth,
        }
    }

    /// Pull the challenge string out of a challenge response body.
    pub(crate) fn challenge_from(self, data: &Value) -> Option<String> {
        let keys: &[&str] = match self {
            Self::Qr          => &["qr", "qrCode"],
            Self::PairingCode => &["code", "pairingCode"],
            Self::Resume      => &[],
        };
        keys.iter()
            .find_map(|k| data.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Qr          => "qr",
            Self::PairingCode => "pairing-code",
            Self::Resume      => "resume",
        })
    }
}

// ─── Challenge ────────────────────────────────────────────────────────────────

/// What [`Authenticator::initiate`] hands back for the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    /// Render as a QR code and scan from the primary device.
    Qr(String),
    /// Type into the primary device.
    PairingCode(String),
    /// Nothing to show; the server answers directly.
    None,
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// One way of getting a [`SessionConnection`] from `Connecting` to `Connected`.
#[async_trait]
pub trait Authenticator: Send {
    fn method(&self) -> AuthMethod;

    /// Start authentication. The connection must be `Connecting`.
    async fn initiate(&mut self, conn: &SessionConnection) -> Result<Challenge, ClientError>;

    /// Resolve with the completed credentials, or the reason they were refused.
    async fn await_completion(&mut self, conn: &SessionConnection) -> Result<Credentials, ClientError>;
}

// ─── QrAuth ───────────────────────────────────────────────────────────────────

/// Log in by scanning a QR code.
#[derive(Debug, Default)]
pub struct QrAuth;

#[async_trait]
impl Authenticator for QrAuth {
    fn method(&self) -> AuthMethod { AuthMethod::Qr }

    async fn initiate(&mut self, conn: &SessionConnection) -> Result<Challenge, ClientError> {
        conn.request_qr_code().await.map(Challenge::Qr)
    }

    async fn await_completion(&mut self, conn: &SessionConnection) -> Result<Credentials, ClientError> {
        conn.wait_for_authentication().await
    }
}

// ─── PairingCodeAuth ──────────────────────────────────────────────────────────

/// Log in by typing a short code on the primary device.
#[derive(Debug, Default)]
pub struct PairingCodeAuth {
    phone_number: Option<String>,
}

impl PairingCodeAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the server to bind the code to this phone number.
    pub fn for_phone(phone_number: impl Into<String>) -> Self {
        Self { phone_number: Some(phone_number.into()) }
    }
}

#[async_trait]
impl Authenticator for PairingCodeAuth {
    fn method(&self) -> AuthMethod { AuthMethod::PairingCode }

    async fn initiate(&mut self, conn: &SessionConnection) -> Result<Challenge, ClientError> {
        conn.request_pairing_code(self.phone_number.as_deref()).await.map(Challenge::PairingCode)
    }

    async fn await_completion(&mut self, conn: &SessionConnection) -> Result<Credentials, ClientError> {
        conn.wait_for_authentication().await
    }
}

// ─── ResumeAuth ───────────────────────────────────────────────────────────────

/// Present previously issued credentials.
///
/// The server accepts or rejects immediately, so `initiate` already knows
/// the outcome and `await_completion` just hands it over.
pub struct ResumeAuth {
    credentials: Credentials,
    outcome:     Option<Result<Credentials, ClientError>>,
}

impl ResumeAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials, outcome: None }
    }
}

#[async_trait]
impl Authenticator for ResumeAuth {
    fn method(&self) -> AuthMethod { AuthMethod::Resume }

    async fn initiate(&mut self, conn: &SessionConnection) -> Result<Challenge, ClientError> {
        let outcome = conn.resume(self.credentials.clone()).await;
        let result = outcome.as_ref().map(|_| Challenge::None).map_err(|e| e.clone());
        self.outcome = Some(outcome);
        result
    }

    async fn await_completion(&mut self, conn: &SessionConnection) -> Result<Credentials, ClientError> {
        match self.outcome.take() {
            Some(outcome) => outcome,
            None => conn.resume(self.credentials.clone()).await,
        }
    }
}
