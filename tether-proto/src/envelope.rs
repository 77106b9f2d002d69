//! Inbound envelopes and typed push events.
//!
//! Every frame the server sends decodes to an [`InboundEnvelope`]. Tagged
//! envelopes are responses; untagged ones are pushes and are classified into
//! a [`PushEvent`] by their `type`. Unknown kinds map to
//! [`PushEvent::Unrecognized`] instead of being coerced into a known shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProtoError, ServerCredentials};

/// Push `type` that completes a QR / pairing-code authentication.
pub const AUTH_SUCCESS: &str = "auth_success";
/// Push `type` that rejects an in-flight authentication.
pub const AUTH_FAILURE: &str = "auth_failure";

// ─── InboundEnvelope ──────────────────────────────────────────────────────────

/// `{ tag?, type, data?, error? }` as received from the server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Correlation tag; present on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Message kind.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Body, `null` when absent.
    #[serde(default)]
    pub data: Value,
    /// Server-reported failure for a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-issued credential fields some servers send beside `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

impl InboundEnvelope {
    /// A successful response to `tag`.
    pub fn response(tag: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self { tag: Some(tag.into()), kind: kind.into(), data, error: None, credentials: None }
    }

    /// A failed response to `tag`.
    pub fn failure(tag: impl Into<String>, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()), kind: kind.into(), data: Value::Null, error: Some(error.into()), credentials: None }
    }

    /// An untagged push.
    pub fn push(kind: impl Into<String>, data: Value) -> Self {
        Self { tag: None, kind: kind.into(), data, error: None, credentials: None }
    }

    /// `true` when this envelope answers a request.
    pub fn is_response(&self) -> bool {
        self.tag.is_some()
    }

    /// `true` for the reserved authentication markers.
    pub fn is_auth_marker(&self) -> bool {
        self.kind == AUTH_SUCCESS || self.kind == AUTH_FAILURE
    }

    /// Where the server-issued credential fields live: a top-level
    /// `credentials` object, else `data.credentials`, else `data` itself.
    pub fn credentials_body(&self) -> &Value {
        self.credentials.as_ref()
            .or_else(|| self.data.get("credentials"))
            .unwrap_or(&self.data)
    }

    /// Classify this envelope as a push event.
    pub fn classify(&self) -> Result<PushEvent, ProtoError> {
        PushEvent::from_envelope(self)
    }
}

// ─── Payloads ─────────────────────────────────────────────────────────────────

/// What a message carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image with optional caption.
    Image,
    /// Video with optional caption.
    Video,
    /// Voice note or audio file.
    Audio,
    /// Arbitrary document.
    Document,
    /// Sticker.
    Sticker,
    /// Anything the server adds later.
    #[serde(other)]
    Other,
}

/// Media descriptor attached to a message. Fetching the bytes is the
/// caller's concern.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Download location.
    #[serde(default)]
    pub url: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub mimetype: String,
    /// Caption shown with the media.
    #[serde(default)]
    pub caption: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Original file name for documents.
    #[serde(default)]
    pub filename: Option<String>,
}

/// An inbound message or the echo of one we sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Server message ID.
    pub id: String,
    /// Sender JID.
    pub from: String,
    /// Recipient JID (chat).
    #[serde(default)]
    pub to: Option<String>,
    /// Text body or caption.
    #[serde(default)]
    pub body: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Media descriptor for non-text kinds.
    #[serde(default)]
    pub media: Option<MediaInfo>,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// `true` when sent by this account.
    #[serde(default)]
    pub from_me: bool,
    /// ID of the message this one quotes.
    #[serde(default)]
    pub quoted_id: Option<String>,
}

impl MessagePayload {
    /// `true` if the message carries media.
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// The chat this message belongs to: the recipient for our own messages,
    /// the sender otherwise.
    pub fn chat(&self) -> &str {
        match (&self.to, self.from_me) {
            (Some(to), true) => to,
            _ => &self.from,
        }
    }
}

/// A message was revoked ("deleted for everyone").
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokePayload {
    /// ID of the revoked message.
    pub id: String,
    /// Chat JID.
    pub chat: String,
    /// Who revoked it, if reported.
    #[serde(default)]
    pub revoked_by: Option<String>,
}

/// Presence state reported for a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    /// Online.
    Available,
    /// Offline.
    Unavailable,
    /// Typing.
    Composing,
    /// Recording audio.
    Recording,
    /// Stopped typing.
    Paused,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// A presence update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// Contact JID.
    pub jid: String,
    /// New state.
    pub presence: PresenceKind,
    /// Last-seen Unix timestamp, if shared.
    #[serde(default)]
    pub last_seen: Option<i64>,
}

/// What changed in a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    /// Participants joined or were added.
    Add,
    /// Participants left or were removed.
    Remove,
    /// Participants became admins.
    Promote,
    /// Participants lost admin.
    Demote,
    /// Subject changed.
    Subject,
    /// Description changed.
    Description,
    /// Settings (announce / restrict) changed.
    Settings,
    /// Anything else.
    #[serde(other)]
    Other,
}

/// A group update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdatePayload {
    /// Group JID.
    pub group: String,
    /// Kind of change.
    pub action: GroupAction,
    /// Affected participants.
    #[serde(default)]
    pub participants: Vec<String>,
    /// New subject, for [`GroupAction::Subject`].
    #[serde(default)]
    pub subject: Option<String>,
    /// Who made the change.
    #[serde(default)]
    pub author: Option<String>,
}

// ─── PushEvent ────────────────────────────────────────────────────────────────

/// A classified server push.
#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    /// Authentication completed; carries server-issued credential fields.
    AuthSuccess(ServerCredentials),
    /// Authentication rejected.
    AuthFailure {
        /// Server-supplied reason.
        reason: String,
    },
    /// Inbound message.
    Message(MessagePayload),
    /// Echo of a message created by this account (possibly on another device).
    MessageCreate(MessagePayload),
    /// A message was revoked.
    MessageRevoke(RevokePayload),
    /// Presence update.
    PresenceUpdate(PresencePayload),
    /// Group update.
    GroupUpdate(GroupUpdatePayload),
    /// Keepalive answer.
    Pong,
    /// A kind outside the known set.
    Unrecognized {
        /// The raw `type`.
        kind: String,
        /// The raw body.
        data: Value,
    },
}

impl PushEvent {
    /// Classify an envelope by its `type`.
    ///
    /// Fails only when a *known* kind carries a body of the wrong shape.
    pub fn from_envelope(env: &InboundEnvelope) -> Result<Self, ProtoError> {
        fn body<T: serde::de::DeserializeOwned>(data: &Value) -> Result<T, ProtoError> {
            T::deserialize(data).map_err(Into::into)
        }

        Ok(match env.kind.as_str() {
            AUTH_SUCCESS => {
                let creds = env.credentials_body();
                if creds.is_null() {
                    Self::AuthSuccess(ServerCredentials::default())
                } else {
                    Self::AuthSuccess(body(creds)?)
                }
            }
            AUTH_FAILURE => {
                let reason = env.data.get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| env.error.clone())
                    .unwrap_or_else(|| "rejected by server".to_string());
                Self::AuthFailure { reason }
            }
            "message"                       => Self::Message(body(&env.data)?),
            "message_create"                => Self::MessageCreate(body(&env.data)?),
            "message_revoke"                => Self::MessageRevoke(body(&env.data)?),
            "presence_update" | "presence"  => Self::PresenceUpdate(body(&env.data)?),
            "group_update"                  => Self::GroupUpdate(body(&env.data)?),
            "pong"                          => Self::Pong,
            other => Self::Unrecognized { kind: other.to_string(), data: env.data.clone() },
        })
    }

    /// Short name for logs.
    pub fn name(&self) -> &str {
        match self {
            Self::AuthSuccess(_)          => AUTH_SUCCESS,
            Self::AuthFailure { .. }      => AUTH_FAILURE,
            Self::Message(_)              => "message",
            Self::MessageCreate(_)        => "message_create",
            Self::MessageRevoke(_)        => "message_revoke",
            Self::PresenceUpdate(_)       => "presence_update",
            Self::GroupUpdate(_)          => "group_update",
            Self::Pong                    => "pong",
            Self::Unrecognized { kind, .. } => kind,
        }
    }
}
