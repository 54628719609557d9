//! Test doubles shared by the element test suites.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nsmesh_core::{Connection, Context, MeshError, NetworkServiceRequest, RegistryEntry, Result};
use parking_lot::Mutex;

use crate::adapters::server_to_client;
use crate::chain::next_server;
use crate::traits::{Dialer, NetworkServiceServer, RegistryClient, RegistryDialer, RegistryServer};

/// Installs a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// CountingServer
// ---------------------------------------------------------------------------

/// Counts calls and remembers which endpoint names requests carried.
#[derive(Default)]
pub(crate) struct CountingServer {
    requests: AtomicUsize,
    closes: AtomicUsize,
    endpoints: Mutex<BTreeSet<String>>,
    last: Mutex<Option<Connection>>,
}

impl CountingServer {
    pub(crate) fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Distinct `network_service_endpoint_name`s seen by Request.
    pub(crate) fn unique_endpoints(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub(crate) fn last(&self) -> Option<Connection> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl NetworkServiceServer for CountingServer {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .lock()
            .insert(request.connection.network_service_endpoint_name.clone());
        *self.last.lock() = Some(request.connection.clone());
        next_server(ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// Fails the first `failures` requests with `error`, then forwards.
pub(crate) struct FailingServer {
    remaining: AtomicUsize,
    error: MeshError,
}

impl FailingServer {
    pub(crate) fn new(failures: usize, error: MeshError) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
            error,
        }
    }

    /// Fails the next `failures` requests from now on.
    pub(crate) fn fail_next(&self, failures: usize) {
        self.remaining.store(failures, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkServiceServer for FailingServer {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        next_server(ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        next_server(ctx).close(ctx, connection).await
    }
}

/// Endpoint stand-in that can be killed: once dead every call fails with
/// `Unavailable`.
#[derive(Default)]
pub(crate) struct KillSwitch {
    dead: AtomicBool,
}

impl KillSwitch {
    pub(crate) fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkServiceServer for KillSwitch {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(MeshError::Unavailable("endpoint is gone".into()));
        }
        next_server(ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(MeshError::Unavailable("endpoint is gone".into()));
        }
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// CheckContext
// ---------------------------------------------------------------------------

/// Runs `check` against every request's context, then forwards.
pub(crate) struct CheckContext<F> {
    check: F,
}

impl<F> CheckContext<F>
where
    F: Fn(&Context, &NetworkServiceRequest) + Send + Sync + 'static,
{
    pub(crate) fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> NetworkServiceServer for CheckContext<F>
where
    F: Fn(&Context, &NetworkServiceRequest) + Send + Sync + 'static,
{
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        (self.check)(ctx, &request);
        next_server(ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

/// Dialer over a table of in-process chains.
#[derive(Default)]
pub(crate) struct MemoryDialer {
    peers: DashMap<String, Arc<dyn NetworkServiceServer>>,
    dials: AtomicUsize,
}

impl MemoryDialer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, url: &str, server: Arc<dyn NetworkServiceServer>) {
        self.peers.insert(url.to_string(), server);
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, _ctx: &Context, url: &str) -> Result<Arc<dyn NetworkServiceServer>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.peers
            .get(url)
            .map(|peer| Arc::clone(peer.value()))
            .ok_or_else(|| MeshError::Unavailable(format!("nothing listens on {url}")))
    }
}

/// Registry dialer over a table of in-process registry chains.
pub(crate) struct MemoryRegistryDialer<T: RegistryEntry> {
    registries: DashMap<String, Arc<dyn RegistryServer<T>>>,
}

impl<T: RegistryEntry> MemoryRegistryDialer<T> {
    pub(crate) fn new() -> Self {
        Self {
            registries: DashMap::new(),
        }
    }

    pub(crate) fn add(&self, url: &str, registry: Arc<dyn RegistryServer<T>>) {
        self.registries.insert(url.to_string(), registry);
    }

    pub(crate) fn remove(&self, url: &str) {
        self.registries.remove(url);
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryDialer<T> for MemoryRegistryDialer<T> {
    async fn dial(&self, _ctx: &Context, url: &str) -> Result<Arc<dyn RegistryClient<T>>> {
        self.registries
            .get(url)
            .map(|registry| server_to_client(Arc::clone(registry.value())))
            .ok_or_else(|| MeshError::Unavailable(format!("no registry at {url}")))
    }
}
