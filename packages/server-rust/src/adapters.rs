//! Shims between server-shaped and client-shaped registries.
//!
//! Discovery and the federation elements consume registries as clients
//! (Find returns a stream) while registries are built as server chains
//! (Find pushes into a sink). These adapters convert in both directions.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use nsmesh_core::{Context, FindResponse, MeshError, Query, RegistryEntry, Result};
use tokio_stream::wrappers::ReceiverStream;

use crate::chain::{isolate_registry, next_registry};
use crate::traits::{FindSink, FindStream, RegistryClient, RegistryServer};

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Drives a registry server chain through the client interface.
pub struct ServerToClient<T: RegistryEntry> {
    server: Arc<dyn RegistryServer<T>>,
}

impl<T: RegistryEntry> ServerToClient<T> {
    #[must_use]
    pub fn new(server: Arc<dyn RegistryServer<T>>) -> Self {
        Self { server }
    }
}

/// Client view of `server`.
#[must_use]
pub fn server_to_client<T: RegistryEntry>(
    server: Arc<dyn RegistryServer<T>>,
) -> Arc<dyn RegistryClient<T>> {
    Arc::new(ServerToClient::new(server))
}

#[async_trait]
impl<T: RegistryEntry> RegistryClient<T> for ServerToClient<T> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        self.server.register(&isolate_registry::<T>(ctx), entry).await
    }

    /// The server side runs in its own task so a watch can outlive this
    /// call; it stops when the consumer drops the stream or `ctx` ends.
    async fn find(&self, ctx: &Context, query: Query<T>) -> Result<FindStream<T>> {
        let (sink, rx) = FindSink::channel();
        let server = Arc::clone(&self.server);
        let ctx = isolate_registry::<T>(ctx);
        tokio::spawn(async move {
            if let Err(err) = server.find(&ctx, query, sink.clone()).await {
                if !sink.is_closed() {
                    sink.fail(err).await;
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        self.server.unregister(&isolate_registry::<T>(ctx), entry).await
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Registry server element that delegates to a client, then continues with
/// the rest of its own chain.
pub struct ClientToServer<T: RegistryEntry> {
    client: Arc<dyn RegistryClient<T>>,
}

impl<T: RegistryEntry> ClientToServer<T> {
    #[must_use]
    pub fn new(client: Arc<dyn RegistryClient<T>>) -> Self {
        Self { client }
    }
}

/// Server element view of `client`.
#[must_use]
pub fn client_to_server<T: RegistryEntry>(
    client: Arc<dyn RegistryClient<T>>,
) -> Arc<dyn RegistryServer<T>> {
    Arc::new(ClientToServer::new(client))
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for ClientToServer<T> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        let registered = self.client.register(ctx, entry).await?;
        next_registry::<T>(ctx).register(ctx, registered).await
    }

    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        let stream = self.client.find(ctx, query.clone()).await?;
        if !pump(ctx, stream, &sink, |response| response).await? {
            return Ok(());
        }
        next_registry::<T>(ctx).find(ctx, query, sink).await
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        self.client.unregister(ctx, entry.clone()).await?;
        next_registry::<T>(ctx).unregister(ctx, entry).await
    }
}

/// Copies `stream` into `sink`, rewriting each item with `map`.
///
/// Returns `Ok(false)` if the sink's consumer went away first.
pub(crate) async fn pump<T, F>(
    ctx: &Context,
    mut stream: FindStream<T>,
    sink: &FindSink<T>,
    map: F,
) -> Result<bool>
where
    T: RegistryEntry,
    F: Fn(FindResponse<T>) -> FindResponse<T> + Send,
{
    loop {
        let item = tokio::select! {
            item = stream.next() => item,
            () = ctx.done() => return Err(ctx.err().unwrap_or(MeshError::Canceled)),
        };
        match item {
            Some(Ok(response)) => {
                if sink.send(map(response)).await.is_err() {
                    return Ok(false);
                }
            }
            Some(Err(err)) => return Err(err),
            None => return Ok(true),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
