//! Heal coordinator.
//!
//! Each connection that passed through the element is tracked in one of
//! three states:
//!
//! ```text
//! Active --(endpoint lost | transport failure)--> Healing --> Active
//!                                                        \--> Failed
//! ```
//!
//! A heal resubmits the original request (service and labels, the endpoint
//! only if the application pinned it) with the same connection id and the
//! path truncated after this hop, through the rest of the chain. Healthy
//! upstream hops see an unchanged segment and treat it as a refresh.
//!
//! All work on one connection id is serialized: a refresh that races a heal
//! waits for it and is then rewritten onto the healed path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use metrics::counter;
use nsmesh_core::{
    duration_until, Connection, Context, ErrorKind, MeshError, NetworkServiceEndpoint,
    NetworkServiceRequest, Query, RegistryEntry, Result, Stage,
};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::chain::{next_server, Next};
use crate::config::HealConfig;
use crate::tools::{KeyedLock, Ticket, TimerSet};
use crate::traits::{NetworkServiceServer, RegistryClient};

/// Heal events buffered per subscriber.
const EVENT_BUFFER: usize = 64;

/// Lifecycle state of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealState {
    Active,
    Healing,
    Failed,
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealEvent {
    pub connection_id: String,
    pub state: HealState,
}

#[derive(Clone)]
struct Entry {
    /// Request as the application first made it.
    request: NetworkServiceRequest,
    /// Connection as the chain last returned it.
    connection: Connection,
    /// Whether the application chose the endpoint itself.
    pinned: bool,
    next: Next<dyn NetworkServiceServer>,
    ctx: Context,
    state: HealState,
}

/// Moves `connection` onto the path and endpoint of `healed`, keeping the
/// segments up to and including this hop as the caller sent them.
fn adopt_healed(connection: &mut Connection, healed: &Connection) {
    let keep = connection.path.index + 1;
    connection.path.path_segments.truncate(keep);
    connection
        .path
        .path_segments
        .extend(healed.path.path_segments.iter().skip(keep).cloned());
    connection
        .network_service_endpoint_name
        .clone_from(&healed.network_service_endpoint_name);
}

/// Registry names whose loss breaks `connection`: the endpoint plus every
/// hop after this one.
fn watched_names(connection: &Connection) -> Vec<String> {
    let mut names: Vec<String> = connection
        .path
        .path_segments
        .iter()
        .skip(connection.path.index + 1)
        .map(|segment| segment.name.clone())
        .collect();
    let endpoint = &connection.network_service_endpoint_name;
    if !endpoint.is_empty() && !names.contains(endpoint) {
        names.push(endpoint.clone());
    }
    names
}

/// Waits until one of `names` is unregistered or seen expired. Returns the
/// lost name, or `None` if the registry ends the watch.
async fn wait_for_loss(
    ctx: &Context,
    registry: &dyn RegistryClient<NetworkServiceEndpoint>,
    names: &[String],
) -> Result<Option<String>> {
    let mut stream = registry
        .find(ctx, Query::watch(NetworkServiceEndpoint::default()))
        .await?;
    while let Some(response) = stream.next().await {
        let response = response?;
        let endpoint = &response.item;
        if !names.contains(&endpoint.name) {
            continue;
        }
        if response.deleted || endpoint.is_expired() {
            return Ok(Some(endpoint.name.clone()));
        }
    }
    Ok(None)
}

struct Shared {
    heal_timeout: Duration,
    retry_interval: Duration,
    attempt_timeout: Duration,
    nse_registry: Option<Arc<dyn RegistryClient<NetworkServiceEndpoint>>>,
    entries: DashMap<String, Entry>,
    locks: KeyedLock,
    timers: TimerSet,
    events: broadcast::Sender<HealEvent>,
}

impl Shared {
    fn publish(&self, id: &str, state: HealState) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.state = state;
        }
        let _ = self.events.send(HealEvent {
            connection_id: id.to_string(),
            state,
        });
    }

    /// Remembers a healthy connection and starts watching what serves it.
    fn track(self: &Arc<Self>, id: &str, entry: Entry) {
        let names = watched_names(&entry.connection);
        self.entries.insert(id.to_string(), entry);
        let Some(registry) = self.nse_registry.clone() else {
            return;
        };
        if names.is_empty() {
            self.timers.cancel(id);
            return;
        }
        let shared = Arc::clone(self);
        let key = id.to_string();
        self.timers.arm(id, Duration::ZERO, move |ticket| {
            shared.monitor(ticket, key, names, registry)
        });
    }

    fn monitor(
        self: Arc<Self>,
        ticket: Ticket,
        id: String,
        names: Vec<String>,
        registry: Arc<dyn RegistryClient<NetworkServiceEndpoint>>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let watch_ctx = self.timers.scope().child();
            let lost = tokio::select! {
                () = ticket.cancelled() => Ok(None),
                lost = wait_for_loss(&watch_ctx, registry.as_ref(), &names) => lost,
            };
            watch_ctx.cancel();

            match lost {
                Ok(Some(name)) => {
                    debug!(connection_id = %id, nse = %name, "serving endpoint lost");
                    let _guard = self.locks.lock(&id).await;
                    if !self.timers.take_if_current(&id, ticket.generation) {
                        return;
                    }
                    let Some(entry) = self.entries.get(&id).map(|entry| entry.value().clone())
                    else {
                        return;
                    };
                    if let Err(err) = self.heal(&id, entry).await {
                        debug!(connection_id = %id, error = %err, "background heal gave up");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(connection_id = %id, error = %err, "endpoint watch ended");
                }
            }
        })
    }

    /// Drops the failed entry for `id` once the token its caller presented
    /// lapses, unless a Close or a new Request got to it first.
    fn forget_when_expired(self: &Arc<Self>, id: &str, connection: &Connection) {
        let path = &connection.path;
        let delay = path
            .previous()
            .or_else(|| path.current())
            .and_then(|segment| segment.expires)
            .map_or(self.heal_timeout, duration_until);
        let shared = Arc::clone(self);
        let key = id.to_string();
        self.timers.arm(id, delay, move |ticket| async move {
            let _guard = shared.locks.lock(&key).await;
            if !shared.timers.take_if_current(&key, ticket.generation) {
                return;
            }
            if shared
                .entries
                .remove_if(&key, |_, entry| entry.state == HealState::Failed)
                .is_some()
            {
                debug!(connection_id = %key, "failed connection forgotten");
            }
        });
    }

    /// Runs one heal for `id`. The caller holds the connection's lock.
    async fn heal(self: &Arc<Self>, id: &str, entry: Entry) -> Result<Connection> {
        self.publish(id, HealState::Healing);

        let mut request = entry.request.clone();
        request.connection = entry.connection.clone();
        request
            .connection
            .network_service
            .clone_from(&entry.request.connection.network_service);
        request
            .connection
            .labels
            .clone_from(&entry.request.connection.labels);
        if !entry.pinned {
            request.connection.network_service_endpoint_name.clear();
        }
        request.connection.path.truncate_after_current();

        let deadline = entry.ctx.with_timeout(self.heal_timeout);
        let mut attempts: u32 = 0;
        let failure = loop {
            attempts += 1;
            counter!("nsmesh_heal_attempts_total").increment(1);
            let attempt = deadline.with_timeout(self.attempt_timeout);
            match entry.next.request(&attempt, request.clone()).await {
                Ok(connection) => {
                    debug!(
                        connection_id = %id,
                        nse = %connection.network_service_endpoint_name,
                        attempts,
                        "connection healed"
                    );
                    counter!("nsmesh_heal_outcomes_total", "outcome" => "healed").increment(1);
                    self.track(
                        id,
                        Entry {
                            connection: connection.clone(),
                            state: HealState::Active,
                            ..entry.clone()
                        },
                    );
                    self.publish(id, HealState::Active);
                    return Ok(connection);
                }
                Err(err) => {
                    warn!(connection_id = %id, error = %err, attempts, "heal attempt failed");
                    let retry = err.is_retriable()
                        || matches!(
                            err.kind(),
                            ErrorKind::NotFound | ErrorKind::DeadlineExceeded
                        );
                    if !retry || deadline.err().is_some() {
                        break err;
                    }
                    if deadline.sleep(self.retry_interval).await.is_err() {
                        break err;
                    }
                }
            }
        };

        counter!("nsmesh_heal_outcomes_total", "outcome" => "failed").increment(1);
        error!(connection_id = %id, error = %failure, attempts, "heal failed, closing connection");
        self.publish(id, HealState::Failed);
        self.forget_when_expired(id, &entry.connection);

        let close_ctx = entry.ctx.with_timeout(self.attempt_timeout);
        if let Err(err) = entry.next.close(&close_ctx, entry.connection.clone()).await {
            debug!(connection_id = %id, error = %err, "close of failed connection failed");
        }

        let failure = match failure.kind() {
            ErrorKind::Canceled => return Err(failure),
            ErrorKind::DeadlineExceeded => {
                MeshError::Unavailable(format!("no endpoint found to heal connection {id}"))
            }
            _ => failure,
        };
        // Outermost stage is heal even when a downstream stage is attached.
        Err(MeshError::Stage {
            stage: Stage::Heal,
            source: Box::new(failure),
        })
    }
}

/// Heal element. Place it before discovery so a heal re-runs selection.
///
/// With an endpoint registry it also watches the registry and heals as soon
/// as an endpoint serving a connection is unregistered or expires.
pub struct HealServer {
    shared: Arc<Shared>,
}

impl HealServer {
    #[must_use]
    pub fn new(
        scope: &Context,
        config: &HealConfig,
        nse_registry: Option<Arc<dyn RegistryClient<NetworkServiceEndpoint>>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                heal_timeout: config.heal_timeout(),
                retry_interval: config.retry_interval(),
                attempt_timeout: config.attempt_timeout(),
                nse_registry,
                entries: DashMap::new(),
                locks: KeyedLock::new(),
                timers: TimerSet::new(scope),
                events,
            }),
        }
    }

    /// Stream of state changes for every tracked connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealEvent> {
        self.shared.events.subscribe()
    }

    /// Current state of connection `id`, if it is tracked.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<HealState> {
        self.shared.entries.get(id).map(|entry| entry.state)
    }

    /// Stops every endpoint watch and pending heal.
    pub async fn shutdown(&self) {
        self.shared.timers.shutdown().await;
    }
}

#[async_trait]
impl NetworkServiceServer for HealServer {
    async fn request(&self, ctx: &Context, mut request: NetworkServiceRequest) -> Result<Connection> {
        let id = request.connection.id.clone();
        let _guard = self.shared.locks.lock(&id).await;

        let known = self
            .shared
            .entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .filter(|entry| entry.state != HealState::Failed);
        let (original, pinned) = match &known {
            Some(entry) => {
                adopt_healed(&mut request.connection, &entry.connection);
                (entry.request.clone(), entry.pinned)
            }
            None => (
                request.clone(),
                !request.connection.network_service_endpoint_name.is_empty(),
            ),
        };

        let next = next_server(ctx);
        match next.request(ctx, request).await {
            Ok(connection) => {
                self.shared.track(
                    &id,
                    Entry {
                        request: original,
                        connection: connection.clone(),
                        pinned,
                        next,
                        ctx: ctx.rebase(self.shared.timers.scope()),
                        state: HealState::Active,
                    },
                );
                Ok(connection)
            }
            Err(err) if err.is_retriable() => match known {
                Some(mut entry) => {
                    debug!(connection_id = %id, error = %err, "request to known connection failed, healing");
                    entry.ctx = ctx.rebase(self.shared.timers.scope());
                    entry.next = next;
                    self.shared.heal(&id, entry).await
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn close(&self, ctx: &Context, mut connection: Connection) -> Result<()> {
        let id = connection.id.clone();
        let _guard = self.shared.locks.lock(&id).await;

        self.shared.timers.cancel(&id);
        match self.shared.entries.remove(&id).map(|(_, entry)| entry) {
            Some(entry) if entry.state == HealState::Failed => {
                debug!(connection_id = %id, "connection already closed after failed heal");
                Ok(())
            }
            Some(entry) => {
                adopt_healed(&mut connection, &entry.connection);
                next_server(ctx).close(ctx, connection).await
            }
            None => next_server(ctx).close(ctx, connection).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
