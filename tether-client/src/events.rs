//! Lifecycle and push events delivered to subscribers.
//!
//! Every subscriber gets every event, in the order the connection emitted
//! it. Subscribers that have dropped their [`EventStream`] are pruned on the
//! next emit.

use std::sync::Mutex;

use tether_proto::{
    Credentials, GroupUpdatePayload, MessagePayload, PresencePayload, RevokePayload,
};
use tokio::sync::mpsc;

use crate::lock;

// ─── Event ────────────────────────────────────────────────────────────────────

/// Something the connection wants its owner to know about.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A transport is being opened.
    Connecting,
    /// The transport is up and no stored credentials exist; pick a strategy.
    AuthMethodRequired,
    /// A QR challenge to render.
    Qr(String),
    /// A pairing code to show the user.
    PairingCode(String),
    /// Authentication completed; persist these.
    Authenticated(Credentials),
    /// The session is live.
    Ready,
    /// An inbound chat message.
    Message(MessagePayload),
    /// A message created by this account on another device.
    MessageCreate(MessagePayload),
    /// A message was deleted for everyone.
    MessageRevoke(RevokePayload),
    /// Group membership or metadata changed.
    GroupUpdate(GroupUpdatePayload),
    /// A contact's presence changed.
    PresenceUpdate(PresencePayload),
    /// The transport closed.
    Disconnected { code: u16, reason: String },
    /// A reconnect attempt is about to be made.
    Reconnecting { attempt: u32 },
    /// A reconnect attempt succeeded.
    Reconnected,
    /// The reconnect policy gave up.
    ReconnectFailed { attempts: u32 },
    /// The transport could not be opened or bootstrapped.
    ConnectionFailed(String),
    /// The server rejected an authentication attempt.
    AuthFailure(String),
}

impl Event {
    /// The event's wire-style name, e.g. `"message_revoke"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting            => "connecting",
            Self::AuthMethodRequired    => "auth_method_required",
            Self::Qr(_)                 => "qr",
            Self::PairingCode(_)        => "pairing_code",
            Self::Authenticated(_)      => "authenticated",
            Self::Ready                 => "ready",
            Self::Message(_)            => "message",
            Self::MessageCreate(_)      => "message_create",
            Self::MessageRevoke(_)      => "message_revoke",
            Self::GroupUpdate(_)        => "group_update",
            Self::PresenceUpdate(_)     => "presence_update",
            Self::Disconnected { .. }   => "disconnected",
            Self::Reconnecting { .. }   => "reconnecting",
            Self::Reconnected           => "reconnected",
            Self::ReconnectFailed { .. } => "reconnect_failed",
            Self::ConnectionFailed(_)   => "connection_failed",
            Self::AuthFailure(_)        => "auth_failure",
        }
    }

    /// `true` for the reconnect-supervisor lifecycle.
    pub fn is_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. } | Self::Reconnecting { .. } | Self::Reconnected | Self::ReconnectFailed { .. }
        )
    }
}

// ─── EventStream ──────────────────────────────────────────────────────────────

/// Asynchronous stream of [`Event`]s.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// The next event if one is already queued.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

// ─── EventBus ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        EventStream { rx }
    }

    pub fn emit(&self, event: Event) {
        tracing::trace!("[tether] event {}", event.name());
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}
