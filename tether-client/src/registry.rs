//! Pending-request bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;

use tether_proto::{InboundEnvelope, RequestKind};
use tokio::sync::oneshot;

use crate::errors::ClientError;
use crate::lock;

pub(crate) type Reply = Result<InboundEnvelope, ClientError>;

struct PendingRequest {
    kind: RequestKind,
    tx:   oneshot::Sender<Reply>,
}

/// Maps outstanding tags to the caller waiting on them.
///
/// Every entry is completed exactly once: by [`resolve`](Self::resolve) when
/// the matching response arrives, by [`remove`](Self::remove) when the
/// caller gives up, or by [`drain`](Self::drain) when the connection closes.
/// Whichever comes first removes the entry, so the others become no-ops.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tag`. Fails if the tag is already outstanding.
    pub fn register(&self, tag: &str, kind: RequestKind) -> Result<oneshot::Receiver<Reply>, ClientError> {
        let mut pending = lock(&self.pending);
        if pending.contains_key(tag) {
            return Err(ClientError::illegal(format!("tag {tag} is already pending")));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(tag.to_owned(), PendingRequest { kind, tx });
        Ok(rx)
    }

    /// Complete the entry matching `env.tag`.
    ///
    /// A response carrying an `error` completes the caller with
    /// [`ClientError::Server`]. Returns the envelope back if nothing was
    /// waiting for it.
    pub fn resolve(&self, env: InboundEnvelope) -> Result<(), InboundEnvelope> {
        let Some(tag) = env.tag.as_deref() else { return Err(env) };
        let Some(entry) = lock(&self.pending).remove(tag) else { return Err(env) };

        let reply = match &env.error {
            Some(message) => Err(ClientError::Server {
                kind:    entry.kind.to_string(),
                message: message.clone(),
            }),
            None => Ok(env),
        };
        // The caller may have stopped listening; nothing left to do then.
        let _ = entry.tx.send(reply);
        Ok(())
    }

    /// Drop the entry for `tag` without completing it.
    pub fn remove(&self, tag: &str) -> bool {
        lock(&self.pending).remove(tag).is_some()
    }

    /// Fail every outstanding entry with `err`. Returns how many there were.
    pub fn drain(&self, err: &ClientError) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        let n = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(err.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        lock(&self.pending).contains_key(tag)
    }
}

/// Removes a tag from the registry when the waiting future goes away.
pub(crate) struct PendingGuard<'a> {
    registry: &'a RequestRegistry,
    tag:      &'a str,
    armed:    bool,
}

impl<'a> PendingGuard<'a> {
    pub fn new(registry: &'a RequestRegistry, tag: &'a str) -> Self {
        Self { registry, tag, armed: true }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.remove(self.tag);
        }
    }
}
