//! Reconnect policies and the supervisor that applies them.

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tether_proto::Credentials;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionState, SessionConnection};
use crate::errors::ClientError;
use crate::events::Event;
use crate::lock;

// ─── Policy ───────────────────────────────────────────────────────────────────

/// Decides whether the supervisor makes another attempt, and after how long.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn should_retry(&self, ctx: &ReconnectContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`ReconnectPolicy::should_retry`] before each attempt.
pub struct ReconnectContext {
    /// Attempts already made since the last successful connect.
    pub attempts:   u32,
    /// Why the previous attempt failed; `None` before the first one.
    pub last_error: Option<ClientError>,
}

/// Never reconnect.
pub struct NoReconnect;
impl ReconnectPolicy for NoReconnect {
    fn should_retry(&self, _: &ReconnectContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Up to `max_attempts` attempts, `interval` apart.
#[derive(Clone, Debug)]
pub struct FixedInterval {
    pub max_attempts: u32,
    pub interval:     Duration,
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self { max_attempts: 5, interval: Duration::from_secs(3) }
    }
}

impl ReconnectPolicy for FixedInterval {
    fn should_retry(&self, ctx: &ReconnectContext) -> ControlFlow<(), Duration> {
        if ctx.attempts < self.max_attempts {
            ControlFlow::Continue(self.interval)
        } else {
            ControlFlow::Break(())
        }
    }
}

// ─── Supervisor ───────────────────────────────────────────────────────────────

/// Start the supervisor unless one is already running or a connect is in
/// flight. Returns whether it was started.
pub(crate) fn spawn(conn: &SessionConnection, creds: Credentials) -> bool {
    let inner = conn.inner();
    if inner.connecting.load(Ordering::SeqCst) {
        tracing::debug!("[tether] Connect in flight, not starting reconnect supervisor");
        return false;
    }
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return false;
    }
    let token = CancellationToken::new();
    if let Some(old) = lock(&inner.supervisor).replace(token.clone()) {
        old.cancel();
    }

    let conn = conn.clone();
    tokio::spawn(async move {
        supervise(&conn, creds, &token).await;
        conn.inner().reconnecting.store(false, Ordering::SeqCst);
    });
    true
}

async fn supervise(conn: &SessionConnection, creds: Credentials, token: &CancellationToken) {
    let inner = conn.inner();
    let policy = inner.config.effective_reconnect_policy();
    let mut last_error = None;

    loop {
        if token.is_cancelled() {
            return;
        }
        if conn.state() != ConnectionState::Disconnected {
            tracing::debug!("[tether] Connection re-established elsewhere, supervisor exiting");
            return;
        }

        let ctx = ReconnectContext {
            attempts:   inner.reconnect_attempts.load(Ordering::SeqCst),
            last_error: last_error.take(),
        };
        let delay = match policy.should_retry(&ctx) {
            ControlFlow::Continue(d) => d,
            ControlFlow::Break(())   => break,
        };

        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("[tether] Reconnecting (attempt {attempt}) in {delay:?} …");
        inner.events.emit(Event::Reconnecting { attempt });

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match conn.reconnect_with(creds.clone()).await {
            Ok(()) => {
                tracing::info!("[tether] Reconnected ✓  (after {attempt} attempt(s))");
                inner.events.emit(Event::Reconnected);
                return;
            }
            Err(e) => {
                tracing::warn!("[tether] Reconnect attempt {attempt} failed: {e}");
                last_error = Some(e);
            }
        }
    }

    let attempts = inner.reconnect_attempts.load(Ordering::SeqCst);
    tracing::error!("[tether] Giving up after {attempts} reconnect attempt(s)");
    inner.events.emit(Event::ReconnectFailed { attempts });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(attempts: u32) -> ReconnectContext {
        ReconnectContext { attempts, last_error: None }
    }

    #[test]
    fn fixed_interval_stops_at_max() {
        let p = FixedInterval { max_attempts: 2, interval: Duration::from_millis(50) };
        assert_eq!(p.should_retry(&ctx(0)), ControlFlow::Continue(Duration::from_millis(50)));
        assert_eq!(p.should_retry(&ctx(1)), ControlFlow::Continue(Duration::from_millis(50)));
        assert_eq!(p.should_retry(&ctx(2)), ControlFlow::Break(()));
    }

    #[test]
    fn no_reconnect_never_continues() {
        assert_eq!(NoReconnect.should_retry(&ctx(0)), ControlFlow::Break(()));
    }
}
