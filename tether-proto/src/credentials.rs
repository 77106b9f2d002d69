//! The session credential object.
//!
//! Persisted by the caller as opaque JSON:
//!
//! ```json
//! { "publicKey": "…", "privateKey": "…", "serverPublicKey": "…",
//!   "qrCode": "…", "pairingCode": "…", "session": "…" }
//! ```
//!
//! Keys are base64 (standard alphabet). A credential is *partial* right after
//! an authentication request (keys only) and *complete* once the server's
//! fields have been merged in.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use tether_crypto::{KEY_LEN, KeyPair};

use crate::ProtoError;

/// Client key pair plus everything the server issued for this session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Client public key (base64).
    pub public_key: String,
    /// Client private key (base64).
    pub private_key: String,
    /// Server public key (base64); empty until the server issues it.
    #[serde(default)]
    pub server_public_key: String,
    /// QR challenge this credential was created for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    /// Pairing-code challenge this credential was created for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    /// Resumable session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Credential fields the server hands out on successful authentication.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCredentials {
    /// Server public key (base64).
    #[serde(default)]
    pub server_public_key: Option<String>,
    /// Resumable session token.
    #[serde(default)]
    pub session: Option<String>,
}

impl ServerCredentials {
    /// `true` when the server sent nothing to merge.
    pub fn is_empty(&self) -> bool {
        self.server_public_key.is_none() && self.session.is_none()
    }
}

impl Credentials {
    /// Partial credentials holding only the client key pair.
    pub fn from_key_pair(kp: &KeyPair) -> Self {
        Self {
            public_key:  B64.encode(kp.public),
            private_key: B64.encode(kp.private),
            ..Default::default()
        }
    }

    /// Merge server-issued fields. Fields the server leaves out are kept.
    pub fn merge(&mut self, server: ServerCredentials) {
        if let Some(k) = server.server_public_key {
            self.server_public_key = k;
        }
        if let Some(s) = server.session {
            self.session = Some(s);
        }
    }

    /// `true` when there is no client key material at all.
    pub fn is_empty(&self) -> bool {
        self.public_key.is_empty() || self.private_key.is_empty()
    }

    /// `true` when the server has issued something a resume can present.
    pub fn is_resumable(&self) -> bool {
        !self.is_empty() && (self.session.is_some() || !self.server_public_key.is_empty())
    }

    /// Decode the client key pair.
    pub fn key_pair(&self) -> Result<KeyPair, ProtoError> {
        let private = decode_key(&self.private_key)?;
        Ok(KeyPair::from_private(private))
    }

    /// Raw client private key.
    pub fn private_key_bytes(&self) -> Result<[u8; KEY_LEN], ProtoError> {
        decode_key(&self.private_key)
    }

    /// Raw server public key, if issued.
    pub fn server_public_key_bytes(&self) -> Result<Option<[u8; KEY_LEN]>, ProtoError> {
        if self.server_public_key.is_empty() {
            return Ok(None);
        }
        decode_key(&self.server_public_key).map(Some)
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    /// Parse the persisted JSON form.
    pub fn from_json(s: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("server_public_key", &self.server_public_key)
            .field("session", &self.session.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], ProtoError> {
    let raw = B64.decode(s)?;
    raw.try_into()
        .map_err(|v: Vec<u8>| ProtoError::Frame(format!("key must be {KEY_LEN} bytes, got {}", v.len())))
}
