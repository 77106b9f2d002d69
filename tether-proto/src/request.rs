//! Outbound request envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtoError;

/// Every request `type` the server understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Send a text or media message.
    Message,
    /// Ask the server for a media upload slot.
    MediaUploadRequest,
    /// Commit an uploaded media blob.
    MediaUpload,
    /// Publish or subscribe to presence.
    Presence,
    /// Create a group.
    GroupCreate,
    /// Add / remove / promote / demote group participants.
    GroupParticipants,
    /// Change group subject, description or settings.
    GroupUpdate,
    /// Leave a group.
    GroupLeave,
    /// Fetch or revoke a group invite link.
    GroupInviteLink,
    /// Mark messages as read.
    Read,
    /// Delete (revoke) a message.
    MessageDelete,
    /// Start QR authentication.
    RequestQr,
    /// Start pairing-code authentication.
    RequestPairingCode,
    /// Resume a session with stored credentials.
    Auth,
    /// Session bootstrap.
    Init,
    /// Keepalive.
    Ping,
}

impl RequestKind {
    /// The full vocabulary, in wire order.
    pub const ALL: [RequestKind; 16] = [
        Self::Message, Self::MediaUploadRequest, Self::MediaUpload, Self::Presence,
        Self::GroupCreate, Self::GroupParticipants, Self::GroupUpdate, Self::GroupLeave,
        Self::GroupInviteLink, Self::Read, Self::MessageDelete, Self::RequestQr,
        Self::RequestPairingCode, Self::Auth, Self::Init, Self::Ping,
    ];

    /// The wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message            => "message",
            Self::MediaUploadRequest => "media_upload_request",
            Self::MediaUpload        => "media_upload",
            Self::Presence           => "presence",
            Self::GroupCreate        => "group_create",
            Self::GroupParticipants  => "group_participants",
            Self::GroupUpdate        => "group_update",
            Self::GroupLeave         => "group_leave",
            Self::GroupInviteLink    => "group_invite_link",
            Self::Read               => "read",
            Self::MessageDelete      => "message_delete",
            Self::RequestQr          => "request_qr",
            Self::RequestPairingCode => "request_pairing_code",
            Self::Auth               => "auth",
            Self::Init               => "init",
            Self::Ping               => "ping",
        }
    }

    /// Kinds that belong to the authentication handshake.
    pub fn is_auth(self) -> bool {
        matches!(self, Self::RequestQr | Self::RequestPairingCode | Self::Auth)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownKind(s.to_string()))
    }
}

// ─── OutboundRequest ──────────────────────────────────────────────────────────

/// `{ tag, type, data }` as sent to the server.
///
/// `tag` is left empty by callers in the common case; the connection assigns
/// one before the request reaches the socket.
///
/// ```rust
/// use tether_proto::{OutboundRequest, RequestKind};
/// use serde_json::json;
///
/// let req = OutboundRequest::new(RequestKind::Message, json!({ "to": "123@s.tether", "body": "hi" }))
///     .with_tag("a1f3.1");
/// assert_eq!(req.tag.as_deref(), Some("a1f3.1"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Correlation tag. `None` until assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Request kind.
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Request body. Always an object on the wire.
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl OutboundRequest {
    /// Build an untagged request. A non-object `data` is replaced by `{}`.
    pub fn new(kind: RequestKind, data: Value) -> Self {
        let data = if data.is_object() { data } else { empty_object() };
        Self { tag: None, kind, data }
    }

    /// Build an untagged request with an empty body.
    pub fn empty(kind: RequestKind) -> Self {
        Self::new(kind, empty_object())
    }

    /// Set a caller-chosen tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Insert one field into `data`.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}
