//! Inbound frame routing.
//!
//! Every frame goes through one of four doors: the request registry (tagged
//! responses), the authentication path (`auth_success` / `auth_failure`),
//! the event bus (typed pushes), or the floor (undecodable frames, pongs,
//! unknown kinds and responses nobody is waiting for).

use tether_proto::{InboundEnvelope, PushEvent};

use crate::connection::SessionConnection;
use crate::events::Event;

/// Where a frame ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    /// Completed a pending request.
    Response,
    /// Went to the authentication path.
    Auth,
    /// Emitted as the named event.
    Event(&'static str),
    /// Recognised but not forwarded: pongs, late responses, unknown kinds.
    Ignored,
    /// Could not be decoded.
    Malformed,
}

pub(crate) struct MessageDispatcher<'a> {
    conn: &'a SessionConnection,
}

impl<'a> MessageDispatcher<'a> {
    pub fn new(conn: &'a SessionConnection) -> Self {
        Self { conn }
    }

    /// Decode one raw frame and route it.
    pub fn dispatch(&self, raw: &str) -> Routed {
        match self.conn.codec().decode(raw) {
            Ok(env) => self.route(env),
            Err(e) => {
                tracing::warn!("[tether] Dropping malformed frame: {e}");
                Routed::Malformed
            }
        }
    }

    /// Route an already decoded envelope.
    pub fn route(&self, env: InboundEnvelope) -> Routed {
        let env = if env.is_response() {
            match self.conn.resolve_response(env) {
                Ok(()) => return Routed::Response,
                Err(env) if env.is_auth_marker() => env,
                Err(env) => {
                    tracing::debug!(
                        "[tether] No pending request for {} {}, dropped",
                        env.kind, env.tag.as_deref().unwrap_or("-")
                    );
                    return Routed::Ignored;
                }
            }
        } else {
            env
        };

        let push = match env.classify() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("[tether] Dropping malformed {} push: {e}", env.kind);
                return Routed::Malformed;
            }
        };

        let event = match push {
            PushEvent::AuthSuccess(server) => {
                self.conn.complete_auth(server);
                return Routed::Auth;
            }
            PushEvent::AuthFailure { reason } => {
                self.conn.fail_auth(reason);
                return Routed::Auth;
            }
            PushEvent::Pong => return Routed::Ignored,
            PushEvent::Unrecognized { kind, .. } => {
                tracing::debug!("[tether] Unrecognized push `{kind}`, dropped");
                return Routed::Ignored;
            }
            PushEvent::Message(m)        => Event::Message(m),
            PushEvent::MessageCreate(m)  => Event::MessageCreate(m),
            PushEvent::MessageRevoke(r)  => Event::MessageRevoke(r),
            PushEvent::PresenceUpdate(p) => Event::PresenceUpdate(p),
            PushEvent::GroupUpdate(g)    => Event::GroupUpdate(g),
        };
        let name = event.name();
        self.conn.inner().events.emit(event);
        Routed::Event(name)
    }
}
