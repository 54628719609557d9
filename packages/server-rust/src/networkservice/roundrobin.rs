//! Round-robin endpoint selection over discovery candidates.

use async_trait::async_trait;
use dashmap::DashMap;
use nsmesh_core::{Connection, Context, MeshError, NetworkServiceRequest, Result, Stage};
use tracing::debug;

use super::discover::{Candidates, ClientUrl};
use crate::chain::next_server;
use crate::traits::NetworkServiceServer;

/// Picks one of the [`Candidates`], rotating the starting point per network
/// service, and publishes its [`ClientUrl`]. A candidate that fails is
/// skipped in favour of the next one until every candidate was tried.
///
/// Requests that already carry a `ClientUrl` (pinned endpoints) pass
/// through untouched.
#[derive(Debug, Default)]
pub struct RoundRobinServer {
    positions: DashMap<String, usize>,
}

impl RoundRobinServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting index for the next request to `service`.
    fn start(&self, service: &str, candidates: usize) -> usize {
        let mut position = self.positions.entry(service.to_string()).or_insert(0);
        let start = *position % candidates;
        *position = (start + 1) % candidates;
        start
    }
}

#[async_trait]
impl NetworkServiceServer for RoundRobinServer {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        if ctx.value::<ClientUrl>().is_some() {
            return next_server(ctx).request(ctx, request).await;
        }
        let Some(candidates) = ctx.value::<Candidates>() else {
            return Err(MeshError::NotFound("no candidate endpoints to select from".into())
                .at(Stage::Discover));
        };
        let endpoints = &candidates.endpoints;
        if endpoints.is_empty() {
            return Err(MeshError::NotFound(format!(
                "no candidate endpoints for {}",
                candidates.network_service.name
            ))
            .at(Stage::Discover));
        }

        let start = self.start(&candidates.network_service.name, endpoints.len());
        let mut last_error = None;
        for offset in 0..endpoints.len() {
            let endpoint = &endpoints[(start + offset) % endpoints.len()];
            let mut attempt = request.clone();
            attempt
                .connection
                .network_service_endpoint_name
                .clone_from(&endpoint.name);
            let ctx = ctx.with_value(ClientUrl(endpoint.url.clone()));
            match next_server(&ctx).request(&ctx, attempt).await {
                Ok(connection) => return Ok(connection),
                Err(err) if err.is_context_error() => return Err(err),
                Err(err) => {
                    debug!(nse = %endpoint.name, error = %err, "candidate failed, trying the next one");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MeshError::NotFound("no candidate succeeded".into())))
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
