//! tether wire vocabulary.
//!
//! This crate handles:
//! * Outbound request envelopes and the fixed request-kind vocabulary
//! * Inbound envelopes and their classification into typed push events
//! * The persisted [`Credentials`] object
//! * Correlation tag allocation
//! * Text framing, plain or encrypted through a [`tether_crypto::CryptoProvider`]
//!
//! It performs no I/O: bring your own socket.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod credentials;
pub mod envelope;
pub mod request;
pub mod tag;

pub use codec::Codec;
pub use credentials::{Credentials, ServerCredentials};
pub use envelope::{
    GroupAction, GroupUpdatePayload, InboundEnvelope, MediaInfo, MessageKind, MessagePayload,
    PresenceKind, PresencePayload, PushEvent, RevokePayload,
};
pub use request::{OutboundRequest, RequestKind};
pub use tag::TagGenerator;

/// Errors raised while encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The payload is not valid JSON or does not match the expected shape.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// An encrypted frame or key field was not valid base64.
    #[error("malformed base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The crypto capability rejected the frame.
    #[error("crypto: {0}")]
    Crypto(#[from] tether_crypto::CryptoError),
    /// The frame cannot be read in the codec's current mode.
    #[error("unexpected frame: {0}")]
    Frame(String),
    /// A request `type` outside the fixed vocabulary.
    #[error("unknown request kind `{0}`")]
    UnknownKind(String),
}
