//! Periodic ping while a session is live.

use std::sync::Weak;
use std::time::Duration;

use tether_proto::{OutboundRequest, RequestKind};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::{Inner, SessionConnection};

/// Ping every `period` until `token` is cancelled or the connection is gone.
///
/// Pings are fire-and-forget; a failed send is logged and the loop carries
/// on, since a dead link is reported by the transport itself.
pub(crate) fn spawn(inner: Weak<Inner>, period: Duration, token: CancellationToken) {
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    let conn = SessionConnection::from_inner(inner);
                    match conn.send(OutboundRequest::empty(RequestKind::Ping)).await {
                        Ok(tag) => tracing::trace!("[tether] ping {tag}"),
                        Err(e)  => tracing::warn!("[tether] Keepalive ping failed: {e}"),
                    }
                }
            }
        }
        tracing::debug!("[tether] Keepalive stopped");
    });
}
