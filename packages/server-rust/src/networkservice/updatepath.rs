//! Path bookkeeping for one hop.

use async_trait::async_trait;
use nsmesh_core::{Connection, Context, NetworkServiceRequest, Result};

use crate::chain::next_server;
use crate::traits::NetworkServiceServer;

/// Keeps the hop's own segment in `connection.path` and points the path
/// cursor at it while the call travels downstream.
///
/// Downstream elements see `connection.id` equal to this hop's segment id;
/// the caller's cursor and id are restored on the way back.
pub struct UpdatePathServer {
    name: String,
}

impl UpdatePathServer {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NetworkServiceServer for UpdatePathServer {
    async fn request(&self, ctx: &Context, mut request: NetworkServiceRequest) -> Result<Connection> {
        let previous = request.connection.enter_hop(&self.name)?;
        let mut connection = next_server(ctx).request(ctx, request).await?;
        connection.leave_hop(previous);
        Ok(connection)
    }

    async fn close(&self, ctx: &Context, mut connection: Connection) -> Result<()> {
        connection.enter_hop(&self.name)?;
        next_server(ctx).close(ctx, connection).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nsmesh_core::{ErrorKind, PathSegment};

    use super::*;
    use crate::chain::server_chain;
    use crate::testing::{CheckContext, CountingServer};

    fn two_hops(counting: &Arc<CountingServer>) -> Arc<dyn NetworkServiceServer> {
        server_chain(vec![
            Arc::new(UpdatePathServer::new("nsc")) as Arc<dyn NetworkServiceServer>,
            Arc::new(UpdatePathServer::new("nsmgr")),
            Arc::new(CheckContext::new(|_, request: &NetworkServiceRequest| {
                let connection = &request.connection;
                assert_eq!(connection.path.index, 1);
                assert_eq!(connection.id, connection.path.path_segments[1].id);
            })),
            Arc::clone(counting) as Arc<dyn NetworkServiceServer>,
        ])
    }

    #[tokio::test]
    async fn new_connection_gets_one_segment_per_hop() {
        let counting = Arc::new(CountingServer::default());
        let chain = two_hops(&counting);

        let connection = chain
            .request(
                &Context::background(),
                Connection::new("conn-1", "ns-1").into(),
            )
            .await
            .unwrap();

        let names: Vec<_> = connection
            .path
            .path_segments
            .iter()
            .map(|segment| segment.name.as_str())
            .collect();
        assert_eq!(names, ["nsc", "nsmgr"]);
        assert_eq!(connection.path.index, 0);
        assert_eq!(connection.id, "conn-1");
        assert_eq!(connection.path.path_segments[0].id, "conn-1");
        assert_ne!(connection.path.path_segments[1].id, "conn-1");
    }

    #[tokio::test]
    async fn refresh_keeps_segment_ids() {
        let counting = Arc::new(CountingServer::default());
        let chain = two_hops(&counting);
        let ctx = Context::background();

        let first = chain
            .request(&ctx, Connection::new("conn-1", "ns-1").into())
            .await
            .unwrap();
        let second = chain.request(&ctx, first.clone().into()).await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(counting.requests(), 2);
    }

    #[tokio::test]
    async fn foreign_segment_after_cursor_is_replaced() {
        let counting = Arc::new(CountingServer::default());
        let chain = two_hops(&counting);
        let mut connection = Connection::new("conn-1", "ns-1");
        connection.path.path_segments = vec![
            PathSegment::new("nsc", "conn-1"),
            PathSegment::new("stale-hop", "old"),
        ];

        let connection = chain
            .request(&Context::background(), connection.into())
            .await
            .unwrap();

        assert_eq!(connection.path.len(), 2);
        assert_eq!(connection.path.path_segments[1].name, "nsmgr");
    }

    #[tokio::test]
    async fn out_of_range_cursor_is_rejected() {
        let counting = Arc::new(CountingServer::default());
        let chain = two_hops(&counting);
        let mut connection = Connection::new("conn-1", "ns-1");
        connection.path.path_segments = vec![PathSegment::new("nsc", "conn-1")];
        connection.path.index = 4;

        let err = chain
            .request(&Context::background(), connection.into())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(counting.requests(), 0);
    }

    #[tokio::test]
    async fn close_reaches_the_end_of_the_chain() {
        let counting = Arc::new(CountingServer::default());
        let chain = two_hops(&counting);
        let ctx = Context::background();
        let connection = chain
            .request(&ctx, Connection::new("conn-1", "ns-1").into())
            .await
            .unwrap();

        chain.close(&ctx, connection).await.unwrap();

        assert_eq!(counting.closes(), 1);
    }
}
