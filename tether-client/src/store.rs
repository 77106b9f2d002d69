//! Pluggable credential storage.
//!
//! The [`CredentialStore`] trait abstracts over where [`Credentials`] are
//! persisted between runs. The connection loads from it on `connect()` when
//! it holds no credentials of its own, saves to it after every successful
//! authentication, and clears it on logout.
//!
//! Two built-in stores are provided:
//! * [`JsonFileStore`] — the credential JSON in a single file.
//! * [`InMemoryStore`] — nothing on disk (default).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tether_proto::Credentials;

use crate::lock;

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Where and how credentials are persisted.
pub trait CredentialStore: Send + Sync {
    /// Persist `creds`, replacing whatever was stored.
    fn save(&self, creds: &Credentials) -> io::Result<()>;

    /// Load previously persisted credentials, or `None` if none exist.
    fn load(&self) -> io::Result<Option<Credentials>>;

    /// Remove the stored credentials (e.g. on logout).
    fn delete(&self) -> io::Result<()>;

    /// Human-readable name of this store (for log messages).
    fn name(&self) -> &str;
}

// ─── JsonFileStore ────────────────────────────────────────────────────────────

/// Stores the credential JSON in one file.
///
/// Writes go to a sibling `.tmp` file first and are renamed into place, so a
/// crash mid-save never leaves a truncated credential behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for JsonFileStore {
    fn save(&self, creds: &Credentials) -> io::Result<()> {
        let json = creds.to_json().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Credentials::from_json(&raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn delete(&self) -> io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn name(&self) -> &str { "json-file" }
}

// ─── InMemoryStore ────────────────────────────────────────────────────────────

/// An ephemeral store that keeps credentials for the life of the process.
///
/// Useful for testing, or for callers that persist [`crate::Event::Authenticated`]
/// themselves.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<Option<Credentials>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with `creds`.
    pub fn with(creds: Credentials) -> Self {
        Self { data: Mutex::new(Some(creds)) }
    }
}

impl CredentialStore for InMemoryStore {
    fn save(&self, creds: &Credentials) -> io::Result<()> {
        *lock(&self.data) = Some(creds.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Credentials>> {
        Ok(lock(&self.data).clone())
    }

    fn delete(&self) -> io::Result<()> {
        *lock(&self.data) = None;
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_crypto::KeyPair;
    use tether_proto::ServerCredentials;

    fn creds() -> Credentials {
        let mut c = Credentials::from_key_pair(&KeyPair::from_private([7u8; 32]));
        c.merge(ServerCredentials { server_public_key: None, session: Some("sess".into()) });
        c
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("creds.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&creds()).unwrap();
        assert_eq!(store.load().unwrap(), Some(creds()));
        assert!(!dir.path().join("creds.tmp").exists());

        store.delete().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.delete().unwrap();
    }

    #[test]
    fn json_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn in_memory_round_trip() {
        let store = InMemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&creds()).unwrap();
        assert_eq!(store.load().unwrap(), Some(creds()));
        store.delete().unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(InMemoryStore::with(creds()).load().unwrap(), Some(creds()));
    }
}
