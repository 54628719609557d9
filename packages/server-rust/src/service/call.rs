//! Calls carried by the pipeline and the service that runs them on a chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

use nsmesh_core::{Connection, Context, MeshError, NetworkServiceRequest};
use tower::Service;

use crate::traits::NetworkServiceServer;

/// One Request or Close together with the context it runs under.
#[derive(Debug, Clone)]
pub enum MeshCall {
    Request {
        ctx: Context,
        request: NetworkServiceRequest,
    },
    Close {
        ctx: Context,
        connection: Connection,
    },
}

impl MeshCall {
    #[must_use]
    pub fn request(ctx: Context, request: impl Into<NetworkServiceRequest>) -> Self {
        Self::Request {
            ctx,
            request: request.into(),
        }
    }

    #[must_use]
    pub fn close(ctx: Context, connection: Connection) -> Self {
        Self::Close { ctx, connection }
    }

    #[must_use]
    pub fn ctx(&self) -> &Context {
        match self {
            Self::Request { ctx, .. } | Self::Close { ctx, .. } => ctx,
        }
    }

    /// Replaces the call's context.
    #[must_use]
    pub fn with_ctx(self, ctx: Context) -> Self {
        match self {
            Self::Request { request, .. } => Self::Request { ctx, request },
            Self::Close { connection, .. } => Self::Close { ctx, connection },
        }
    }

    /// `"request"` or `"close"`, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Close { .. } => "close",
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        match self {
            Self::Request { request, .. } => &request.connection.id,
            Self::Close { connection, .. } => &connection.id,
        }
    }
}

/// Result of a successful [`MeshCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshResponse {
    /// The connection the chain returned for a Request.
    Connection(Connection),
    /// A Close completed.
    Closed,
}

// ---------------------------------------------------------------------------
// ChainService
// ---------------------------------------------------------------------------

/// Innermost service of the pipeline: runs each call on a chain.
#[derive(Clone)]
pub struct ChainService {
    chain: Arc<dyn NetworkServiceServer>,
}

impl ChainService {
    #[must_use]
    pub fn new(chain: Arc<dyn NetworkServiceServer>) -> Self {
        Self { chain }
    }
}

impl Service<MeshCall> for ChainService {
    type Response = MeshResponse;
    type Error = MeshError;
    type Future = Pin<Box<dyn Future<Output = Result<MeshResponse, MeshError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: MeshCall) -> Self::Future {
        let chain = Arc::clone(&self.chain);
        Box::pin(async move {
            match call {
                MeshCall::Request { ctx, request } => chain
                    .request(&ctx, request)
                    .await
                    .map(MeshResponse::Connection),
                MeshCall::Close { ctx, connection } => {
                    chain.close(&ctx, connection).await.map(|()| MeshResponse::Closed)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
