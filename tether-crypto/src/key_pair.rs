//! `KeyPair` — the client half of a session's key material.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::{CryptoError, KEY_LEN, random_bytes};

/// An X25519 key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public:  [u8; KEY_LEN],
    pub private: [u8; KEY_LEN],
}

impl KeyPair {
    /// Generate a key pair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; KEY_LEN];
        random_bytes(&mut seed)?;
        Ok(Self::from_private(seed))
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private(private: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self { public: public.to_bytes(), private: secret.to_bytes() }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair(public={:02x?}…)", &self.public[..4])
    }
}
