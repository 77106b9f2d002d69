//! Default [`CryptoProvider`]: X25519 + AES-256-CTR + HMAC-SHA-256.
//!
//! Frame layout produced by [`X25519Provider::encrypt`]:
//!
//! ```text
//! iv:16 | ciphertext:n | mac:32
//! ```
//!
//! `mac` covers `iv || ciphertext`. Encryption, MAC and signing keys are all
//! derived from the X25519 shared secret with distinct SHA-256 labels.

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{CryptoError, CryptoProvider, KeyPair, random_bytes, sha256, to_key};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN:  usize = 16;
const MAC_LEN: usize = 32;

/// Stateless default provider. Cheap to clone and share.
#[derive(Clone, Copy, Debug, Default)]
pub struct X25519Provider;

struct SessionKeys {
    enc: [u8; 32],
    mac: [u8; 32],
    sig: [u8; 32],
}

impl X25519Provider {
    pub fn new() -> Self { Self }

    fn derive(private: &[u8], peer_public: &[u8]) -> Result<SessionKeys, CryptoError> {
        let secret = StaticSecret::from(to_key(private, "private key")?);
        let peer   = PublicKey::from(to_key(peer_public, "peer public key")?);
        let shared = secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::WeakKey);
        }
        let s = shared.as_bytes();
        Ok(SessionKeys {
            enc: sha256!(b"tether-enc", s),
            mac: sha256!(b"tether-mac", s),
            sig: sha256!(b"tether-sig", s),
        })
    }

    fn mac(key: &[u8; 32], parts: &[&[u8]]) -> Result<HmacSha256, CryptoError> {
        let mut m = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("mac key"))?;
        for p in parts { m.update(p); }
        Ok(m)
    }
}

impl CryptoProvider for X25519Provider {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        KeyPair::generate()
    }

    fn sign(&self, private: &[u8], peer_public: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = Self::derive(private, peer_public)?;
        Ok(Self::mac(&keys.sig, &[data])?.finalize().into_bytes().to_vec())
    }

    fn encrypt(&self, private: &[u8], peer_public: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = Self::derive(private, peer_public)?;
        let mut iv = [0u8; IV_LEN];
        random_bytes(&mut iv)?;

        let mut out = Vec::with_capacity(IV_LEN + plaintext.len() + MAC_LEN);
        out.extend_from_slice(&iv);
        out.extend_from_slice(plaintext);
        Aes256Ctr::new(&keys.enc.into(), &iv.into()).apply_keystream(&mut out[IV_LEN..]);

        let tag = Self::mac(&keys.mac, &[&out])?.finalize().into_bytes();
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn decrypt(&self, private: &[u8], peer_public: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < IV_LEN + MAC_LEN {
            return Err(CryptoError::InvalidBuffer(ciphertext.len()));
        }
        let keys = Self::derive(private, peer_public)?;
        let (body, tag) = ciphertext.split_at(ciphertext.len() - MAC_LEN);
        Self::mac(&keys.mac, &[body])?
            .verify_slice(tag)
            .map_err(|_| CryptoError::MacMismatch)?;

        let (iv, data) = body.split_at(IV_LEN);
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidBuffer(body.len()))?;
        let mut plain = data.to_vec();
        Aes256Ctr::new(&keys.enc.into(), &iv.into()).apply_keystream(&mut plain);
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (KeyPair, KeyPair) {
        (KeyPair::generate().unwrap(), KeyPair::generate().unwrap())
    }

    #[test]
    fn both_sides_read_each_other() {
        let p = X25519Provider::new();
        let (client, server) = pair();

        let wire = p.encrypt(&client.private, &server.public, b"{\"type\":\"ping\"}").unwrap();
        assert_ne!(&wire[IV_LEN..wire.len() - MAC_LEN], b"{\"type\":\"ping\"}");

        let plain = p.decrypt(&server.private, &client.public, &wire).unwrap();
        assert_eq!(plain, b"{\"type\":\"ping\"}");
    }

    #[test]
    fn tampered_frame_is_rejected() {
        let p = X25519Provider::new();
        let (client, server) = pair();
        let mut wire = p.encrypt(&client.private, &server.public, b"hello").unwrap();
        wire[IV_LEN] ^= 0x01;
        assert_eq!(
            p.decrypt(&server.private, &client.public, &wire),
            Err(CryptoError::MacMismatch)
        );
    }

    #[test]
    fn short_frame_is_rejected() {
        let p = X25519Provider::new();
        let (client, server) = pair();
        assert_eq!(
            p.decrypt(&server.private, &client.public, &[0u8; 10]),
            Err(CryptoError::InvalidBuffer(10))
        );
    }

    #[test]
    fn signature_verifies_from_server_side() {
        let p = X25519Provider::new();
        let (client, server) = pair();
        let from_client = p.sign(&client.private, &server.public, b"session-token").unwrap();
        let from_server = p.sign(&server.private, &client.public, b"session-token").unwrap();
        assert_eq!(from_client, from_server);
        assert_eq!(from_client.len(), 32);

        let other = p.sign(&client.private, &server.public, b"other-token").unwrap();
        assert_ne!(from_client, other);
    }

    #[test]
    fn wrong_key_length_is_reported() {
        let p = X25519Provider::new();
        let (client, _) = pair();
        assert_eq!(
            p.sign(&client.private, &[1, 2, 3], b"x"),
            Err(CryptoError::InvalidKey("peer public key"))
        );
    }
}
