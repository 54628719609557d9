use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use nsmesh_core::{
    Connection, Context, FindResponse, MeshError, NetworkServiceRequest, Query, RegistryEntry,
    Result,
};
use tokio::sync::mpsc;

/// Element of a connection-oriented mesh chain.
/// Implementations: path/token bookkeeping, discovery, selection, dialing,
/// lifecycle managers, and whole chains (which nest as ordinary elements).
#[async_trait]
pub trait NetworkServiceServer: Send + Sync + 'static {
    /// Establish or refresh a connection. Elements continue the call with
    /// [`crate::chain::next_server`] or return early to short-circuit.
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection>;

    /// Tear down a connection. Elements forward so every resource acquired
    /// during `request` is released.
    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()>;
}

/// Element of a registry chain, server-shaped: Find pushes into a sink.
#[async_trait]
pub trait RegistryServer<T: RegistryEntry>: Send + Sync + 'static {
    /// Store or refresh `entry`. Returns the entry as stored.
    async fn register(&self, ctx: &Context, entry: T) -> Result<T>;

    /// Push every entry matching `query` into `sink`. Watch queries keep
    /// pushing changes until the context ends or the sink is dropped.
    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()>;

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()>;
}

/// Stream of Find results as seen by a registry client.
pub type FindStream<T> = BoxStream<'static, Result<FindResponse<T>>>;

/// Registry as seen by a caller, client-shaped: Find returns a stream.
#[async_trait]
pub trait RegistryClient<T: RegistryEntry>: Send + Sync + 'static {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T>;

    async fn find(&self, ctx: &Context, query: Query<T>) -> Result<FindStream<T>>;

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()>;
}

/// Transport seam: turns an endpoint URL into a mesh element.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, ctx: &Context, url: &str) -> Result<Arc<dyn NetworkServiceServer>>;
}

/// Transport seam: turns a registry address into a registry client.
#[async_trait]
pub trait RegistryDialer<T: RegistryEntry>: Send + Sync + 'static {
    async fn dial(&self, ctx: &Context, url: &str) -> Result<Arc<dyn RegistryClient<T>>>;
}

// ---------------------------------------------------------------------------
// FindSink
// ---------------------------------------------------------------------------

/// Receiving side of a server-streamed Find.
#[derive(Debug)]
pub struct FindSink<T> {
    tx: mpsc::Sender<Result<FindResponse<T>>>,
}

impl<T> Clone for FindSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Buffered Find results before a slow consumer applies backpressure.
pub const FIND_BUFFER: usize = 64;

impl<T: Send + 'static> FindSink<T> {
    /// Sink plus the receiver its items arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Result<FindResponse<T>>>) {
        let (tx, rx) = mpsc::channel(FIND_BUFFER);
        (Self { tx }, rx)
    }

    /// Delivers one result.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` once the consumer has gone away.
    pub async fn send(&self, response: FindResponse<T>) -> Result<()> {
        self.tx
            .send(Ok(response))
            .await
            .map_err(|_| MeshError::Canceled)
    }

    /// Terminates the consumer's stream with `err`. Ignored if it is gone.
    pub async fn fail(&self, err: MeshError) {
        let _ = self.tx.send(Err(err)).await;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
