//! Client-side connection refresh.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use metrics::counter;
use nsmesh_core::{duration_until, Connection, Context, NetworkServiceRequest, Result};
use tracing::{debug, warn};

use crate::chain::{next_server, Next};
use crate::config::RefreshConfig;
use crate::tools::{Ticket, TimerSet};
use crate::traits::NetworkServiceServer;

/// Expiry of the token this hop issued for `connection`.
fn own_expiry(connection: &Connection) -> Option<SystemTime> {
    connection.current_segment().and_then(|segment| segment.expires)
}

/// Wait before refreshing a connection whose token expires at `expires`.
///
/// Hops further down a multi-hop path refresh relatively later, so each
/// refresh reaches a hop whose own refresh is not yet due.
fn refresh_delay(connection: &Connection, expires: SystemTime, min_interval: Duration) -> Duration {
    let remaining = duration_until(expires);
    let path = &connection.path;
    let scale = if path.len() > 1 {
        #[allow(clippy::cast_precision_loss)]
        let position = path.index as f64 / path.len() as f64;
        0.2 + 0.2 * position
    } else {
        1.0 / 3.0
    };
    remaining.mul_f64(scale).max(min_interval)
}

struct Shared {
    timers: TimerSet,
    retry_interval: Duration,
    min_interval: Duration,
}

impl Shared {
    async fn refresh_loop(
        self: Arc<Self>,
        ticket: Ticket,
        ctx: Context,
        next: Next<dyn NetworkServiceServer>,
        mut request: NetworkServiceRequest,
    ) {
        loop {
            match next.request(&ctx, request.clone()).await {
                Ok(connection) => {
                    debug!(connection_id = %connection.id, "connection refreshed");
                    let Some(expires) = own_expiry(&connection) else {
                        self.timers.take_if_current(&connection.id, ticket.generation);
                        return;
                    };
                    let delay = refresh_delay(&connection, expires, self.min_interval);
                    request.connection = connection;
                    if !ticket.sleep(delay).await {
                        return;
                    }
                }
                Err(err) => {
                    let id = &request.connection.id;
                    counter!("nsmesh_refresh_failures_total", "kind" => "connection").increment(1);
                    warn!(connection_id = %id, error = %err, "connection refresh failed");
                    let expired = own_expiry(&request.connection)
                        .is_none_or(|expires| expires <= SystemTime::now());
                    if expired || err.is_context_error() {
                        self.timers.take_if_current(id, ticket.generation);
                        return;
                    }
                    if !ticket.sleep(self.retry_interval).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Re-requests each connection it has seen before the token this hop
/// issued expires. Failed refreshes are retried every `retry_interval`
/// until the token lapses. Close stops the refreshing.
///
/// Place it after `updatepath` and before `updatetoken`, so each refresh
/// carries a fresh token.
pub struct RefreshServer {
    shared: Arc<Shared>,
}

impl RefreshServer {
    #[must_use]
    pub fn new(scope: &Context, config: &RefreshConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                timers: TimerSet::new(scope),
                retry_interval: config.retry_interval(),
                min_interval: config.min_interval(),
            }),
        }
    }

    /// Connections currently being kept alive.
    #[must_use]
    pub fn active(&self) -> usize {
        self.shared.timers.len()
    }

    pub async fn shutdown(&self) {
        self.shared.timers.shutdown().await;
    }
}

#[async_trait]
impl NetworkServiceServer for RefreshServer {
    async fn request(&self, ctx: &Context, mut request: NetworkServiceRequest) -> Result<Connection> {
        let next = next_server(ctx);
        let connection = next.request(ctx, request.clone()).await?;

        let Some(expires) = own_expiry(&connection) else {
            self.shared.timers.cancel(&connection.id);
            return Ok(connection);
        };
        let delay = refresh_delay(&connection, expires, self.shared.min_interval);
        request.connection = connection.clone();

        let shared = Arc::clone(&self.shared);
        let replay = ctx.rebase(self.shared.timers.scope());
        self.shared.timers.arm(&connection.id, delay, move |ticket| {
            shared.refresh_loop(ticket, replay, next, request)
        });
        Ok(connection)
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        self.shared.timers.cancel(&connection.id);
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
