//! Text framing for envelopes.
//!
//! A [`Codec`] turns an [`OutboundRequest`] into the text frame handed to the
//! transport, and an inbound text frame back into an [`InboundEnvelope`].
//!
//! Plain frames are the JSON envelope itself. Encrypted frames are
//! `base64(provider.encrypt(json))` and are only produced once the server's
//! public key is known. Decoding accepts both: a frame starting with `{` is
//! always read as plain JSON.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tether_crypto::CryptoProvider;

use crate::{Credentials, InboundEnvelope, OutboundRequest, ProtoError};

struct CipherState {
    provider:    Arc<dyn CryptoProvider>,
    private:     [u8; 32],
    peer_public: [u8; 32],
}

/// Envelope framing, plain or encrypted.
pub struct Codec {
    cipher: Option<CipherState>,
}

impl Codec {
    /// A codec that sends plain JSON.
    pub fn plain() -> Self {
        Self { cipher: None }
    }

    /// A codec that encrypts for the server named in `creds`.
    ///
    /// Fails if `creds` carries no server public key.
    pub fn encrypted(provider: Arc<dyn CryptoProvider>, creds: &Credentials) -> Result<Self, ProtoError> {
        let peer_public = creds
            .server_public_key_bytes()?
            .ok_or_else(|| ProtoError::Frame("no server public key to encrypt for".into()))?;
        Ok(Self {
            cipher: Some(CipherState {
                provider,
                private: creds.private_key_bytes()?,
                peer_public,
            }),
        })
    }

    /// `true` if outbound frames are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Frame an outbound request.
    pub fn encode(&self, req: &OutboundRequest) -> Result<String, ProtoError> {
        let json = serde_json::to_string(req)?;
        match &self.cipher {
            None => Ok(json),
            Some(c) => {
                let wire = c.provider.encrypt(&c.private, &c.peer_public, json.as_bytes())?;
                Ok(B64.encode(wire))
            }
        }
    }

    /// Read an inbound frame.
    pub fn decode(&self, raw: &str) -> Result<InboundEnvelope, ProtoError> {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed).map_err(Into::into);
        }
        let c = self.cipher.as_ref()
            .ok_or_else(|| ProtoError::Frame("non-JSON frame on a plain connection".into()))?;
        let wire  = B64.decode(trimmed.trim_end())?;
        let plain = c.provider.decrypt(&c.private, &c.peer_public, &wire)?;
        serde_json::from_slice(&plain).map_err(Into::into)
    }
}

impl Default for Codec {
    fn default() -> Self { Self::plain() }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Codec({})", if self.is_encrypted() { "encrypted" } else { "plain" })
    }
}
