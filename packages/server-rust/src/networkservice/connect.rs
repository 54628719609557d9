//! Forwards calls to the selected endpoint over the transport.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nsmesh_core::{Connection, Context, ErrorKind, MeshError, NetworkServiceRequest, Result, Stage};
use tracing::{debug, warn};

use super::discover::ClientUrl;
use crate::chain::{isolate, next_server};
use crate::traits::{Dialer, NetworkServiceServer};

/// Dials the [`ClientUrl`] chosen upstream and sends the call to the remote
/// chain, then continues with the local remainder.
///
/// Dialed peers are cached per URL and dropped once they report
/// `Unavailable`. The URL used for each connection is remembered so a later
/// Close reaches the same peer.
pub struct ConnectServer {
    dialer: Arc<dyn Dialer>,
    peers: DashMap<String, Arc<dyn NetworkServiceServer>>,
    urls: DashMap<String, String>,
}

impl ConnectServer {
    #[must_use]
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            peers: DashMap::new(),
            urls: DashMap::new(),
        }
    }

    /// Connections currently bound to a peer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    async fn peer(&self, ctx: &Context, url: &str) -> Result<Arc<dyn NetworkServiceServer>> {
        if let Some(peer) = self.peers.get(url) {
            return Ok(Arc::clone(peer.value()));
        }
        let peer = self.dialer.dial(ctx, url).await.map_err(|err| {
            if err.is_context_error() {
                err
            } else {
                MeshError::Unavailable(format!("dial {url}: {err}")).at(Stage::Dial)
            }
        })?;
        debug!(url, "dialed endpoint");
        self.peers.insert(url.to_string(), Arc::clone(&peer));
        Ok(peer)
    }

    fn forget_peer(&self, url: &str, err: &MeshError) {
        if err.kind() == ErrorKind::Unavailable {
            self.peers.remove(url);
        }
    }
}

#[async_trait]
impl NetworkServiceServer for ConnectServer {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        let id = request.connection.id.clone();
        let url = ctx
            .value::<ClientUrl>()
            .map(|url| url.0.clone())
            .or_else(|| self.urls.get(&id).map(|url| url.value().clone()));
        let Some(url) = url.filter(|url| !url.is_empty()) else {
            return Err(MeshError::InvalidArgument(format!(
                "no endpoint url selected for connection {id}"
            ))
            .at(Stage::Dial));
        };

        let peer = self.peer(ctx, &url).await?;
        let connection = match peer.request(&isolate(ctx), request).await {
            Ok(connection) => connection,
            Err(err) => {
                self.forget_peer(&url, &err);
                return Err(err.at(Stage::Chain));
            }
        };
        self.urls.insert(id, url);
        next_server(ctx).request(ctx, connection.into()).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        let url = self
            .urls
            .remove(&connection.id)
            .map(|(_, url)| url)
            .or_else(|| ctx.value::<ClientUrl>().map(|url| url.0.clone()));

        let remote = match url {
            Some(url) => match self.peer(ctx, &url).await {
                Ok(peer) => peer
                    .close(&isolate(ctx), connection.clone())
                    .await
                    .map_err(|err| {
                        self.forget_peer(&url, &err);
                        err.at(Stage::Chain)
                    }),
                Err(err) => Err(err),
            },
            None => Ok(()),
        };
        if let Err(err) = &remote {
            warn!(connection_id = %connection.id, error = %err, "remote close failed");
        }
        let local = next_server(ctx).close(ctx, connection).await;
        remote.and(local)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
