//! Endpoint discovery and label matching.
//!
//! Discovery resolves the requested network service against the registries
//! and publishes the endpoints allowed to serve the request as
//! [`Candidates`]. A request that pins an endpoint by name skips matching
//! and publishes that endpoint's [`ClientUrl`] directly.
//!
//! When the caller bounded the request and did not pin an endpoint, a
//! retriable failure further down the chain re-runs selection and tries
//! again until the deadline. Pinned requests fail at once so heal can act.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use nsmesh_core::selector::is_subset;
use nsmesh_core::{
    Connection, Context, ErrorKind, Labels, MeshError, NetworkService, NetworkServiceEndpoint,
    NetworkServiceRequest, Query, RegistryEntry, Result, Stage,
};
use tracing::debug;

use crate::chain::next_server;
use crate::config::DiscoverConfig;
use crate::traits::{FindStream, NetworkServiceServer, RegistryClient};

/// Endpoints discovery found for the request, in registry order.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
    pub network_service: NetworkService,
    pub endpoints: Vec<NetworkServiceEndpoint>,
}

/// Dial target chosen for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUrl(pub String);

/// Endpoints selected by the service's matches for a requester carrying
/// `labels`.
///
/// Matches are scanned in registration order and the first whose source
/// selector is satisfied decides. A deciding match yields the endpoints its
/// routes select; when that is nothing and the match falls through, the
/// scan continues. With no deciding match every endpoint qualifies.
#[must_use]
pub fn select_endpoints(
    service: &NetworkService,
    labels: &Labels,
    endpoints: &[NetworkServiceEndpoint],
) -> Vec<NetworkServiceEndpoint> {
    for rule in &service.matches {
        if !is_subset(labels, &rule.source_selector, labels) {
            continue;
        }
        let selected: Vec<_> = endpoints
            .iter()
            .filter(|endpoint| {
                let offered = endpoint.labels_for(&service.name);
                rule.routes.iter().any(|route| {
                    is_subset(&offered, &route.destination_selector, labels)
                })
            })
            .cloned()
            .collect();
        if selected.is_empty() && rule.fallthrough {
            continue;
        }
        return selected;
    }
    endpoints.to_vec()
}

/// Discovery element.
pub struct DiscoverServer {
    ns_registry: Arc<dyn RegistryClient<NetworkService>>,
    nse_registry: Arc<dyn RegistryClient<NetworkServiceEndpoint>>,
    watch_for_endpoints: bool,
    retry_interval: Duration,
}

impl DiscoverServer {
    #[must_use]
    pub fn new(
        ns_registry: Arc<dyn RegistryClient<NetworkService>>,
        nse_registry: Arc<dyn RegistryClient<NetworkServiceEndpoint>>,
        config: &DiscoverConfig,
    ) -> Self {
        Self {
            ns_registry,
            nse_registry,
            watch_for_endpoints: config.watch_for_endpoints,
            retry_interval: config.retry_interval(),
        }
    }

    /// Waiting only makes sense when the caller bounded the request.
    fn may_wait(&self, ctx: &Context) -> bool {
        self.watch_for_endpoints && ctx.deadline().is_some()
    }

    /// Live entry named exactly like `query`, waiting for it to register
    /// when allowed.
    async fn find_exact<T: RegistryEntry>(
        &self,
        ctx: &Context,
        registry: &Arc<dyn RegistryClient<T>>,
        query: T,
    ) -> Result<T> {
        let name = query.name().to_string();
        let accept = |entry: &T| entry.name() == name;
        let not_found = || MeshError::NotFound(format!("{} {name} is not registered", T::KIND));

        let mut snapshot = registry.find(ctx, Query::snapshot(query.clone())).await?;
        if let Some(found) = ctx.run(next_accepted(&mut snapshot, &accept)).await? {
            return Ok(found);
        }
        if !self.may_wait(ctx) {
            return Err(not_found());
        }

        debug!(kind = T::KIND, name = %name, "waiting for registration");
        let watch_ctx = ctx.child();
        let mut watch = registry.find(&watch_ctx, Query::watch(query)).await?;
        let waited = watch_ctx.run(next_accepted(&mut watch, &accept)).await;
        watch_ctx.cancel();
        match waited {
            Ok(Some(found)) => Ok(found),
            Ok(None) => Err(not_found()),
            Err(err) if err.kind() == ErrorKind::DeadlineExceeded => Err(not_found()),
            Err(err) => Err(err),
        }
    }

    /// Endpoints offering `service` that the matches allow, waiting for
    /// one to appear when allowed.
    async fn find_candidates(
        &self,
        ctx: &Context,
        service: &NetworkService,
        labels: &Labels,
    ) -> Result<Vec<NetworkServiceEndpoint>> {
        let query = NetworkServiceEndpoint {
            network_service_names: vec![service.name.clone()],
            ..NetworkServiceEndpoint::default()
        };
        let not_found = || {
            MeshError::NotFound(format!(
                "no endpoint of {} matches labels {labels:?}",
                service.name
            ))
        };

        let mut snapshot = self
            .nse_registry
            .find(ctx, Query::snapshot(query.clone()))
            .await?;
        let offered = ctx.run(collect_live(&mut snapshot)).await?;
        let selected = select_endpoints(service, labels, &offered);
        if !selected.is_empty() {
            return Ok(selected);
        }
        if !self.may_wait(ctx) {
            return Err(not_found());
        }

        debug!(network_service = %service.name, "waiting for a matching endpoint");
        let selectable = |endpoint: &NetworkServiceEndpoint| {
            !select_endpoints(service, labels, std::slice::from_ref(endpoint)).is_empty()
        };
        let watch_ctx = ctx.child();
        let mut watch = self.nse_registry.find(&watch_ctx, Query::watch(query)).await?;
        let waited = watch_ctx.run(next_accepted(&mut watch, &selectable)).await;
        watch_ctx.cancel();
        match waited {
            Ok(Some(endpoint)) => Ok(vec![endpoint]),
            Ok(None) => Err(not_found()),
            Err(err) if err.kind() == ErrorKind::DeadlineExceeded => Err(not_found()),
            Err(err) => Err(err),
        }
    }

    /// Resolves the requested service and the endpoints allowed to serve
    /// `connection`, filling in the service payload when the request has
    /// none.
    async fn select(&self, ctx: &Context, connection: &mut Connection) -> Result<Candidates> {
        let service = self
            .find_exact(
                ctx,
                &self.ns_registry,
                NetworkService::new(connection.network_service.clone()),
            )
            .await?;
        if connection.payload.is_empty() {
            connection.payload.clone_from(&service.payload);
        }
        let endpoints = self
            .find_candidates(ctx, &service, &connection.labels)
            .await?;
        debug!(
            network_service = %service.name,
            candidates = endpoints.len(),
            "endpoints discovered"
        );
        Ok(Candidates {
            network_service: service,
            endpoints,
        })
    }
}

/// Next live entry of `stream` accepted by `accept`, or `None` once the
/// stream ends.
async fn next_accepted<T, F>(stream: &mut FindStream<T>, accept: &F) -> Result<Option<T>>
where
    T: RegistryEntry,
    F: Fn(&T) -> bool + Sync,
{
    while let Some(response) = stream.next().await {
        let response = response?;
        if !response.deleted && !response.item.is_expired() && accept(&response.item) {
            return Ok(Some(response.item));
        }
    }
    Ok(None)
}

/// Every live entry of a snapshot stream.
async fn collect_live<T: RegistryEntry>(stream: &mut FindStream<T>) -> Result<Vec<T>> {
    let mut live = Vec::new();
    while let Some(response) = stream.next().await {
        let response = response?;
        if !response.deleted && !response.item.is_expired() {
            live.push(response.item);
        }
    }
    Ok(live)
}

#[async_trait]
impl NetworkServiceServer for DiscoverServer {
    async fn request(&self, ctx: &Context, mut request: NetworkServiceRequest) -> Result<Connection> {
        let connection = &mut request.connection;

        if !connection.network_service_endpoint_name.is_empty() {
            let endpoint = self
                .find_exact(
                    ctx,
                    &self.nse_registry,
                    NetworkServiceEndpoint::new(connection.network_service_endpoint_name.clone()),
                )
                .await
                .map_err(|err| err.at(Stage::Discover))?;
            debug!(nse = %endpoint.name, url = %endpoint.url, "endpoint pinned by request");
            let ctx = ctx
                .with_value(Candidates {
                    network_service: NetworkService::new(connection.network_service.clone()),
                    endpoints: vec![endpoint.clone()],
                })
                .with_value(ClientUrl(endpoint.url));
            return next_server(&ctx).request(&ctx, request).await;
        }

        let retry = ctx.deadline().is_some();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let candidates = self
                .select(ctx, &mut request.connection)
                .await
                .map_err(|err| err.at(Stage::Discover))?;
            let ctx = ctx.with_value(candidates);
            let err = match next_server(&ctx).request(&ctx, request.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(err) => err,
            };
            if !retry || !err.is_retriable() {
                return Err(err);
            }
            debug!(error = %err, attempts, "downstream request failed, rediscovering");
            if ctx.sleep(self.retry_interval).await.is_err() {
                return Err(err);
            }
        }
    }

    /// Points the close at the endpoint that served the connection, if it
    /// is still registered.
    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        if connection.network_service_endpoint_name.is_empty() || ctx.value::<ClientUrl>().is_some()
        {
            return next_server(ctx).close(ctx, connection).await;
        }
        let name = connection.network_service_endpoint_name.clone();
        let url = match self
            .nse_registry
            .find(ctx, Query::snapshot(NetworkServiceEndpoint::new(name.clone())))
            .await
        {
            Ok(mut stream) => ctx
                .run(next_accepted(&mut stream, &|endpoint: &NetworkServiceEndpoint| {
                    endpoint.name == name
                }))
                .await
                .ok()
                .flatten()
                .map(|endpoint| endpoint.url),
            Err(_) => None,
        };
        match url {
            Some(url) => {
                let ctx = ctx.with_value(ClientUrl(url));
                next_server(&ctx).close(&ctx, connection).await
            }
            None => next_server(ctx).close(ctx, connection).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use nsmesh_core::Match;
    use parking_lot::Mutex;

    use super::*;
    use crate::adapters::server_to_client;
    use crate::chain::{registry_chain, server_chain};
    use crate::registry::{MemoryRegistry, SetIdRegistry};
    use crate::testing::{CheckContext, CountingServer, FailingServer};
    use crate::traits::RegistryServer;

    const SERVICE: &str = "secure-intranet-connectivity";

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    fn app(name: &str) -> Labels {
        labels(&[("app", name)])
    }

    fn from_anywhere() -> Match {
        Match::new(Labels::new(), vec![app("firewall")])
    }

    fn from_firewall() -> Match {
        Match::new(app("firewall"), vec![app("some-middle-app")])
    }

    fn from_middle() -> Match {
        Match::new(app("some-middle-app"), vec![app("vpn-gateway")])
    }

    struct Registries {
        ns: Arc<dyn RegistryServer<NetworkService>>,
        nse: Arc<dyn RegistryServer<NetworkServiceEndpoint>>,
    }

    impl Registries {
        fn new() -> Self {
            Self {
                ns: registry_chain(vec![
                    Arc::new(MemoryRegistry::<NetworkService>::new())
                        as Arc<dyn RegistryServer<NetworkService>>,
                ]),
                nse: registry_chain(vec![
                    Arc::new(SetIdRegistry::new())
                        as Arc<dyn RegistryServer<NetworkServiceEndpoint>>,
                    Arc::new(MemoryRegistry::<NetworkServiceEndpoint>::new()),
                ]),
            }
        }

        async fn with_service(self, matches: Vec<Match>) -> Self {
            self.ns
                .register(
                    &Context::background(),
                    NetworkService::new(SERVICE).with_matches(matches),
                )
                .await
                .unwrap();
            self
        }

        async fn with_standard_endpoints(self) -> Self {
            for name in ["firewall", "some-middle-app", "vpn-gateway"] {
                self.nse
                    .register(
                        &Context::background(),
                        NetworkServiceEndpoint::default()
                            .with_url(format!("tcp://{name}"))
                            .with_service(SERVICE, app(name)),
                    )
                    .await
                    .unwrap();
            }
            self
        }

        fn discover(&self) -> Arc<dyn NetworkServiceServer> {
            Arc::new(DiscoverServer::new(
                server_to_client(Arc::clone(&self.ns)),
                server_to_client(Arc::clone(&self.nse)),
                &DiscoverConfig::default(),
            ))
        }
    }

    type Seen = Arc<Mutex<Vec<Candidates>>>;

    fn chain(registries: &Registries) -> (Arc<dyn NetworkServiceServer>, Seen) {
        let seen: Seen = Arc::default();
        let record = Arc::clone(&seen);
        let chain = server_chain(vec![
            registries.discover(),
            Arc::new(CheckContext::new(move |ctx: &Context, _: &NetworkServiceRequest| {
                if let Some(candidates) = ctx.value::<Candidates>() {
                    record.lock().push(candidates.clone());
                }
            })),
        ]);
        (chain, seen)
    }

    fn selected_apps(seen: &Seen) -> Vec<String> {
        seen.lock()
            .last()
            .map(|candidates| {
                candidates
                    .endpoints
                    .iter()
                    .map(|endpoint| endpoint.labels_for(SERVICE)["app"].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn request(labels: Labels) -> NetworkServiceRequest {
        Connection::new("conn-1", SERVICE).with_labels(labels).into()
    }

    #[tokio::test]
    async fn empty_labels_select_firewall() {
        let registries = Registries::new()
            .with_service(vec![from_firewall(), from_middle(), from_anywhere()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(&Context::background(), request(Labels::new()))
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen), ["firewall"]);
    }

    #[tokio::test]
    async fn firewall_labels_select_middle_app() {
        let registries = Registries::new()
            .with_service(vec![from_firewall(), from_middle(), from_anywhere()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(&Context::background(), request(app("firewall")))
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen), ["some-middle-app"]);
    }

    #[tokio::test]
    async fn empty_selector_registered_first_wins() {
        let registries = Registries::new()
            .with_service(vec![from_anywhere(), from_firewall(), from_middle()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(&Context::background(), request(app("firewall")))
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen), ["firewall"]);
    }

    #[tokio::test]
    async fn no_satisfied_match_keeps_every_endpoint() {
        let registries = Registries::new()
            .with_service(vec![from_firewall(), from_middle()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(&Context::background(), request(app("unknown-app")))
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen).len(), 3);
    }

    #[tokio::test]
    async fn fallthrough_continues_to_next_match() {
        let mut dead_end = Match::new(Labels::new(), vec![app("nobody")]);
        dead_end.fallthrough = true;
        let registries = Registries::new()
            .with_service(vec![dead_end, from_anywhere()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(&Context::background(), request(Labels::new()))
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen), ["firewall"]);
    }

    #[tokio::test]
    async fn destination_templates_use_requester_labels() {
        let templated = Match::new(
            labels(&[("tier", "edge")]),
            vec![labels(&[("app", "{{.target}}")])],
        );
        let registries = Registries::new()
            .with_service(vec![templated])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        chain
            .request(
                &Context::background(),
                request(labels(&[("tier", "edge"), ("target", "vpn-gateway")])),
            )
            .await
            .unwrap();

        assert_eq!(selected_apps(&seen), ["vpn-gateway"]);
    }

    #[tokio::test]
    async fn payload_is_filled_from_service() {
        let registries = Registries::new();
        let mut service = NetworkService::new(SERVICE);
        service.payload = "IP".into();
        registries
            .ns
            .register(&Context::background(), service)
            .await
            .unwrap();
        let registries = registries.with_standard_endpoints().await;
        let (chain, _) = chain(&registries);

        let connection = chain
            .request(&Context::background(), request(Labels::new()))
            .await
            .unwrap();

        assert_eq!(connection.payload, "IP");
    }

    #[tokio::test]
    async fn pinned_endpoint_publishes_its_url() {
        let registries = Registries::new().with_service(vec![from_anywhere()]).await;
        registries
            .nse
            .register(
                &Context::background(),
                NetworkServiceEndpoint::new("final-endpoint")
                    .with_url("tcp://final-endpoint")
                    .with_service(SERVICE, app("vpn-gateway")),
            )
            .await
            .unwrap();
        let urls = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&urls);
        let chain = server_chain(vec![
            registries.discover(),
            Arc::new(CheckContext::new(move |ctx: &Context, _: &NetworkServiceRequest| {
                record.lock().push(ctx.value::<ClientUrl>().cloned());
            })),
        ]);

        chain
            .request(
                &Context::background(),
                Connection::new("conn-1", SERVICE)
                    .with_labels(app("firewall"))
                    .with_endpoint("final-endpoint")
                    .into(),
            )
            .await
            .unwrap();

        assert_eq!(
            *urls.lock(),
            vec![Some(ClientUrl("tcp://final-endpoint".into()))]
        );
    }

    #[tokio::test]
    async fn pinned_endpoint_absent_is_not_found() {
        let registries = Registries::new()
            .with_service(vec![from_anywhere()])
            .await
            .with_standard_endpoints()
            .await;
        let (chain, seen) = chain(&registries);

        let err = chain
            .request(
                &Context::background(),
                Connection::new("conn-1", SERVICE)
                    .with_endpoint("final-endpoint")
                    .into(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.stage(), Some(Stage::Discover));
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn pinned_endpoint_expired_is_not_found() {
        let registries = Registries::new()
            .with_service(vec![from_anywhere()])
            .await
            .with_standard_endpoints()
            .await;
        let mut stale = NetworkServiceEndpoint::new("final-endpoint")
            .with_url("tcp://final-endpoint")
            .with_service(SERVICE, app("firewall"));
        stale.expiration_time = Some(SystemTime::now() - Duration::from_secs(1));
        registries
            .nse
            .register(&Context::background(), stale)
            .await
            .unwrap();
        let (chain, _) = chain(&registries);

        let err = chain
            .request(
                &Context::background(),
                Connection::new("conn-1", SERVICE)
                    .with_endpoint("final-endpoint")
                    .into(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unknown_service_times_out_as_not_found() {
        let registries = Registries::new().with_standard_endpoints().await;
        let (chain, _) = chain(&registries);

        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = chain.request(&ctx, request(Labels::new())).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.stage(), Some(Stage::Discover));
    }

    #[tokio::test]
    async fn no_endpoint_without_deadline_fails_fast() {
        let registries = Registries::new().with_service(vec![from_anywhere()]).await;
        let (chain, _) = chain(&registries);

        let err = chain
            .request(&Context::background(), request(Labels::new()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn waits_for_endpoint_registered_later() {
        let registries = Registries::new().with_service(vec![from_anywhere()]).await;
        let (chain, seen) = chain(&registries);
        let nse = Arc::clone(&registries.nse);
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            nse.register(
                &Context::background(),
                NetworkServiceEndpoint::new("late-firewall")
                    .with_url("tcp://late")
                    .with_service(SERVICE, app("firewall")),
            )
            .await
            .unwrap();
        });

        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        chain.request(&ctx, request(Labels::new())).await.unwrap();
        late.await.unwrap();

        assert_eq!(selected_apps(&seen), ["firewall"]);
        ctx.cancel();
    }

    fn flaky_chain(
        registries: &Registries,
        failing: Arc<FailingServer>,
        counting: Arc<CountingServer>,
    ) -> Arc<dyn NetworkServiceServer> {
        server_chain(vec![
            registries.discover(),
            Arc::new(CheckContext::new(|ctx: &Context, _: &NetworkServiceRequest| {
                let candidates = ctx.value::<Candidates>().unwrap();
                assert_eq!(candidates.endpoints.len(), 1);
                assert_eq!(candidates.endpoints[0].network_service_names[0], SERVICE);
            })),
            failing as Arc<dyn NetworkServiceServer>,
            counting as Arc<dyn NetworkServiceServer>,
        ])
    }

    async fn with_unnamed_endpoint(registries: &Registries) {
        registries
            .nse
            .register(
                &Context::background(),
                NetworkServiceEndpoint::default().with_service(SERVICE, Labels::new()),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_downstream_is_retried_until_it_succeeds() {
        let registries = Registries::new().with_service(Vec::new()).await;
        with_unnamed_endpoint(&registries).await;
        let counting = Arc::new(CountingServer::default());
        let chain = flaky_chain(
            &registries,
            Arc::new(FailingServer::new(1, MeshError::Unavailable("not ready".into()))),
            Arc::clone(&counting),
        );

        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        chain.request(&ctx, request(Labels::new())).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(counting.requests(), 1);
        ctx.cancel();
    }

    #[tokio::test]
    async fn retries_stop_at_the_deadline_with_the_downstream_error() {
        let registries = Registries::new().with_service(Vec::new()).await;
        with_unnamed_endpoint(&registries).await;
        let counting = Arc::new(CountingServer::default());
        let chain = flaky_chain(
            &registries,
            Arc::new(FailingServer::new(usize::MAX, MeshError::Unavailable("down".into()))),
            Arc::clone(&counting),
        );

        let ctx = Context::background().with_timeout(Duration::from_millis(250));
        let err = chain.request(&ctx, request(Labels::new())).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(counting.requests(), 0);
    }

    #[tokio::test]
    async fn non_retriable_downstream_error_is_returned_at_once() {
        let registries = Registries::new().with_service(Vec::new()).await;
        with_unnamed_endpoint(&registries).await;
        let failing = Arc::new(FailingServer::new(
            1,
            MeshError::InvalidArgument("bad mechanism".into()),
        ));
        let counting = Arc::new(CountingServer::default());
        let chain = flaky_chain(&registries, failing, Arc::clone(&counting));

        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let err = chain.request(&ctx, request(Labels::new())).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(counting.requests(), 0);
        ctx.cancel();
    }

    #[tokio::test]
    async fn request_without_deadline_is_not_retried() {
        let registries = Registries::new().with_service(Vec::new()).await;
        with_unnamed_endpoint(&registries).await;
        let counting = Arc::new(CountingServer::default());
        let chain = flaky_chain(
            &registries,
            Arc::new(FailingServer::new(1, MeshError::Unavailable("not ready".into()))),
            Arc::clone(&counting),
        );

        let err = chain
            .request(&Context::background(), request(Labels::new()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(counting.requests(), 0);
    }
}
