//! Error types for tether-client.

use std::time::Duration;

// ─── ClientError ──────────────────────────────────────────────────────────────

/// Every failure a [`crate::SessionConnection`] operation can surface.
///
/// Cloneable so one failure can be delivered to every pending request when
/// the connection drops.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The socket could not be opened, written or read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation is not legal in the connection's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// No response arrived for `tag` within `after`.
    #[error("request {tag} timed out after {after:?}")]
    RequestTimeout {
        tag:   String,
        after: Duration,
    },

    /// Authentication was rejected, timed out, or lost its connection.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The connection went away while the operation was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// An inbound frame could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The server answered a request with an error.
    #[error("server rejected {kind}: {message}")]
    Server {
        kind:    String,
        message: String,
    },

    /// The credential store failed.
    #[error("credential store: {0}")]
    Storage(String),
}

impl ClientError {
    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    /// `true` for [`ClientError::RequestTimeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// `true` for [`ClientError::IllegalState`].
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }

    /// `true` for [`ClientError::Authentication`].
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// `true` when the failure came from the link rather than the server.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Transport(_))
    }

    /// Match a [`ClientError::Server`] message, with optional wildcard prefix/suffix `'*'`.
    ///
    /// - `err.is("not-authorized")` exact match
    /// - `err.is("rate-*")` starts-with match
    /// - `err.is("*-expired")` ends-with match
    pub fn is(&self, pattern: &str) -> bool {
        let Self::Server { message, .. } = self else { return false };
        if let Some(prefix) = pattern.strip_suffix('*') {
            message.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            message.ends_with(suffix)
        } else {
            message == pattern
        }
    }
}

impl From<tether_proto::ProtoError> for ClientError {
    fn from(e: tether_proto::ProtoError) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
