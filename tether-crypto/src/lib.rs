//! Cryptographic capability for tether sessions.
//!
//! The session state machine never touches a cipher directly; it talks to a
//! [`CryptoProvider`]. The default backend, [`X25519Provider`], provides:
//! - X25519 key pairs
//! - keyed signatures (HMAC-SHA-256 over the X25519 shared secret)
//! - AES-256-CTR payload encryption with encrypt-then-MAC
//!
//! Swap in another provider to match a different server handshake without
//! changing the connection code.

#![deny(unsafe_code)]

mod key_pair;
mod provider;
mod sha;

pub use key_pair::KeyPair;
pub use provider::X25519Provider;

/// Length of every public or private key handled by this crate.
pub const KEY_LEN: usize = 32;

// ─── CryptoError ──────────────────────────────────────────────────────────────

/// Errors from a [`CryptoProvider`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key material has the wrong length or is otherwise unusable.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),
    /// The peer key produced an all-zero shared secret.
    #[error("peer key is not contributory")]
    WeakKey,
    /// Ciphertext shorter than IV + MAC.
    #[error("ciphertext too short ({0} bytes)")]
    InvalidBuffer(usize),
    /// MAC over the ciphertext did not verify.
    #[error("message authentication failed")]
    MacMismatch,
    /// The OS random source failed.
    #[error("random source unavailable")]
    Rng,
}

// ─── CryptoProvider ───────────────────────────────────────────────────────────

/// The crypto capability the session layer is written against.
///
/// Every method takes raw key bytes so implementations stay stateless and can
/// be shared behind an `Arc` between the connection and its tasks.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Generate a fresh key pair for a new authentication attempt.
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Produce a signature over `data` that the holder of `peer_public`'s
    /// private half can verify.
    fn sign(&self, private: &[u8], peer_public: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt `plaintext` for `peer_public`.
    fn encrypt(&self, private: &[u8], peer_public: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a buffer produced by [`CryptoProvider::encrypt`] on the other side.
    fn decrypt(&self, private: &[u8], peer_public: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Fill `buf` from the OS random source.
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::Rng)
}

pub(crate) fn to_key(bytes: &[u8], what: &'static str) -> Result<[u8; KEY_LEN], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKey(what))
}
