//! Closes connections whose token lapses without a refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use metrics::counter;
use nsmesh_core::{duration_until, Connection, Context, NetworkServiceRequest, Result};
use tracing::{debug, warn};

use crate::chain::next_server;
use crate::tools::{KeyedLock, TimerSet};
use crate::traits::NetworkServiceServer;

/// How long a timer-closed connection is remembered so a late Close can
/// still be recognised.
pub const CLOSED_GRACE: Duration = Duration::from_secs(60);

struct Shared {
    timers: TimerSet,
    locks: KeyedLock,
    /// Connections closed by their timer and not requested since.
    closed: DashSet<String>,
    /// Clears `closed` entries once their grace period ends.
    sweeps: TimerSet,
    closed_grace: Duration,
}

impl Shared {
    /// Records that the timer closed `id` and schedules forgetting it.
    fn remember_closed(self: &Arc<Self>, id: &str) {
        self.closed.insert(id.to_string());
        let shared = Arc::clone(self);
        let key = id.to_string();
        self.sweeps.arm(id, self.closed_grace, move |ticket| async move {
            let _guard = shared.locks.lock(&key).await;
            if shared.sweeps.take_if_current(&key, ticket.generation) {
                shared.closed.remove(&key);
            }
        });
    }

    fn forget_closed(&self, id: &str) -> bool {
        self.sweeps.cancel(id);
        self.closed.remove(id).is_some()
    }
}

/// Arms a timer per connection at the expiry of the token the previous hop
/// presented (the hop's own token when it has no previous hop). When it
/// fires, the connection is closed through the rest of the chain.
///
/// A refresh re-arms the timer. An explicit Close cancels it, and a Close
/// arriving after the timer already closed the connection is a no-op, so
/// the end of the chain sees exactly one Close. Timer-closed connections
/// are remembered for a grace period ([`CLOSED_GRACE`] by default).
pub struct TimeoutServer {
    shared: Arc<Shared>,
}

impl TimeoutServer {
    #[must_use]
    pub fn new(scope: &Context) -> Self {
        Self::with_closed_grace(scope, CLOSED_GRACE)
    }

    #[must_use]
    pub fn with_closed_grace(scope: &Context, closed_grace: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                timers: TimerSet::new(scope),
                locks: KeyedLock::new(),
                closed: DashSet::new(),
                sweeps: TimerSet::new(scope),
                closed_grace,
            }),
        }
    }

    /// Connections with a pending timer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.timers.len()
    }

    /// Connections closed by their timer that are still remembered.
    #[must_use]
    pub fn recently_closed(&self) -> usize {
        self.shared.closed.len()
    }

    pub async fn shutdown(&self) {
        self.shared.timers.shutdown().await;
        self.shared.sweeps.shutdown().await;
    }
}

#[async_trait]
impl NetworkServiceServer for TimeoutServer {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        let id = request.connection.id.clone();
        let _guard = self.shared.locks.lock(&id).await;

        let next = next_server(ctx);
        // A failed refresh leaves the previous timer in charge.
        let connection = next.request(ctx, request).await?;
        self.shared.forget_closed(&id);

        let path = &connection.path;
        let expires = path
            .previous()
            .or_else(|| path.current())
            .and_then(|segment| segment.expires);
        let Some(expires) = expires else {
            self.shared.timers.cancel(&id);
            return Ok(connection);
        };

        let shared = Arc::clone(&self.shared);
        let replay = ctx.rebase(self.shared.timers.scope());
        let expiring = connection.clone();
        let key = id.clone();
        self.shared
            .timers
            .arm(&id, duration_until(expires), move |ticket| async move {
                let _guard = shared.locks.lock(&key).await;
                if !shared.timers.take_if_current(&key, ticket.generation) {
                    return;
                }
                shared.remember_closed(&key);
                counter!("nsmesh_timeout_closes_total").increment(1);
                debug!(connection_id = %key, "token expired, closing connection");
                if let Err(err) = next.close(&replay, expiring).await {
                    warn!(connection_id = %key, error = %err, "timeout close failed");
                }
            });
        Ok(connection)
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        let id = connection.id.clone();
        let _guard = self.shared.locks.lock(&id).await;

        let had_timer = self.shared.timers.cancel(&id);
        if !had_timer && self.shared.forget_closed(&id) {
            debug!(connection_id = %id, "already closed by timeout");
            return Ok(());
        }
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
