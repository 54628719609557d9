//! Stamps the hop's path segment with a fresh token.

use std::sync::Arc;

use async_trait::async_trait;
use nsmesh_core::{Connection, Context, MeshError, NetworkServiceRequest, Result, TokenGenerator};

use crate::chain::next_server;
use crate::traits::NetworkServiceServer;

/// Writes `(token, expires)` from the token generator onto the segment at
/// the path cursor. Place it after [`super::UpdatePathServer`].
pub struct UpdateTokenServer {
    generator: Arc<dyn TokenGenerator>,
}

impl UpdateTokenServer {
    #[must_use]
    pub fn new(generator: Arc<dyn TokenGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NetworkServiceServer for UpdateTokenServer {
    async fn request(&self, ctx: &Context, mut request: NetworkServiceRequest) -> Result<Connection> {
        let (token, expires) = self.generator.generate(ctx)?;
        let path = &mut request.connection.path;
        let index = path.index;
        let segment = path.path_segments.get_mut(index).ok_or_else(|| {
            MeshError::InvalidArgument(format!("no path segment at index {index} to stamp"))
        })?;
        segment.token = token;
        segment.expires = Some(expires);
        next_server(ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
