//! Names anonymous endpoint registrations.

use async_trait::async_trait;
use nsmesh_core::{Context, NetworkServiceEndpoint, Query, Result};

use crate::chain::next_registry;
use crate::traits::{FindSink, RegistryServer};

/// Gives endpoints registered without a name a unique one,
/// `<first-service>-<uuid>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetIdRegistry;

impl SetIdRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn generated_name(nse: &NetworkServiceEndpoint) -> String {
    let prefix = nse
        .network_service_names
        .first()
        .map_or("nse", String::as_str);
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

#[async_trait]
impl RegistryServer<NetworkServiceEndpoint> for SetIdRegistry {
    async fn register(
        &self,
        ctx: &Context,
        mut entry: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint> {
        if entry.name.is_empty() {
            entry.name = generated_name(&entry);
        }
        next_registry(ctx).register(ctx, entry).await
    }

    async fn find(
        &self,
        ctx: &Context,
        query: Query<NetworkServiceEndpoint>,
        sink: FindSink<NetworkServiceEndpoint>,
    ) -> Result<()> {
        next_registry(ctx).find(ctx, query, sink).await
    }

    async fn unregister(&self, ctx: &Context, entry: NetworkServiceEndpoint) -> Result<()> {
        next_registry(ctx).unregister(ctx, entry).await
    }
}
