//! Keeps a registration alive by re-registering it before it expires.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use metrics::counter;
use nsmesh_core::{duration_until, Context, Query, RegistryEntry, Result};
use tracing::{debug, warn};

use crate::chain::{next_registry, Next};
use crate::config::RefreshConfig;
use crate::tools::{Ticket, TimerSet};
use crate::traits::{FindSink, RegistryServer};

struct Shared {
    timers: TimerSet,
    retry_interval: Duration,
    min_interval: Duration,
    default_ttl: Duration,
}

impl Shared {
    /// Wait before re-registering an entry that expires at `expires`.
    fn delay_until_refresh(&self, expires: SystemTime) -> Duration {
        (duration_until(expires) / 3).max(self.min_interval)
    }

    async fn refresh_loop<T: RegistryEntry>(
        self: Arc<Self>,
        ticket: Ticket,
        ctx: Context,
        next: Next<dyn RegistryServer<T>>,
        mut current: T,
        ttl: Duration,
    ) {
        loop {
            let mut entry = current.clone();
            entry.set_expiration_time(Some(SystemTime::now() + ttl));
            match next.register(&ctx, entry).await {
                Ok(registered) => {
                    debug!(kind = T::KIND, name = registered.name(), "registration refreshed");
                    let expires = registered
                        .expiration_time()
                        .unwrap_or_else(|| SystemTime::now() + ttl);
                    current = registered;
                    if !ticket.sleep(self.delay_until_refresh(expires)).await {
                        return;
                    }
                }
                Err(err) => {
                    counter!("nsmesh_refresh_failures_total", "kind" => T::KIND).increment(1);
                    warn!(kind = T::KIND, name = current.name(), error = %err, "registration refresh failed");
                    let expired = current
                        .expiration_time()
                        .is_none_or(|expires| expires <= SystemTime::now());
                    if expired || err.is_context_error() {
                        self.timers.take_if_current(current.name(), ticket.generation);
                        return;
                    }
                    if !ticket.sleep(self.retry_interval).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Client-side registration refresher. Place it in front of the chain
/// that reaches the remote registry.
pub struct RefreshRegistry<T: RegistryEntry> {
    shared: Arc<Shared>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: RegistryEntry> RefreshRegistry<T> {
    #[must_use]
    pub fn new(scope: &Context, config: &RefreshConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                timers: TimerSet::new(scope),
                retry_interval: config.retry_interval(),
                min_interval: config.min_interval(),
                default_ttl: config.default_registration_ttl(),
            }),
            _entry: PhantomData,
        }
    }

    /// Registrations currently being kept alive.
    #[must_use]
    pub fn active(&self) -> usize {
        self.shared.timers.len()
    }

    pub async fn shutdown(&self) {
        self.shared.timers.shutdown().await;
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for RefreshRegistry<T> {
    async fn register(&self, ctx: &Context, mut entry: T) -> Result<T> {
        let ttl = entry
            .expiration_time()
            .map_or(self.shared.default_ttl, duration_until);
        if entry.expiration_time().is_none() {
            entry.set_expiration_time(Some(SystemTime::now() + ttl));
        }

        let next = next_registry::<T>(ctx);
        let registered = next.register(ctx, entry).await?;
        let expires = registered
            .expiration_time()
            .unwrap_or_else(|| SystemTime::now() + ttl);

        let shared = Arc::clone(&self.shared);
        let replay = ctx.rebase(self.shared.timers.scope());
        let current = registered.clone();
        self.shared.timers.arm(
            registered.name(),
            self.shared.delay_until_refresh(expires),
            move |ticket| shared.refresh_loop(ticket, replay, next, current, ttl),
        );
        Ok(registered)
    }

    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        next_registry::<T>(ctx).find(ctx, query, sink).await
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        self.shared.timers.cancel(entry.name());
        next_registry::<T>(ctx).unregister(ctx, entry).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nsmesh_core::{MeshError, NetworkServiceEndpoint};

    use super::*;
    use crate::chain::registry_chain;

    /// Counts registrations; fails the ones listed in `fail_on` (1-based).
    #[derive(Default)]
    struct CountingRegistry {
        registrations: AtomicUsize,
        unregistrations: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl RegistryServer<NetworkServiceEndpoint> for CountingRegistry {
        async fn register(
            &self,
            _ctx: &Context,
            entry: NetworkServiceEndpoint,
        ) -> Result<NetworkServiceEndpoint> {
            let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&n) {
                return Err(MeshError::Unavailable("registry restarting".into()));
            }
            Ok(entry)
        }

        async fn find(
            &self,
            _ctx: &Context,
            _query: Query<NetworkServiceEndpoint>,
            _sink: FindSink<NetworkServiceEndpoint>,
        ) -> Result<()> {
            Ok(())
        }

        async fn unregister(&self, _ctx: &Context, _entry: NetworkServiceEndpoint) -> Result<()> {
            self.unregistrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> RefreshConfig {
        RefreshConfig {
            retry_interval_ms: 10,
            min_interval_ms: 1,
            default_registration_ttl_ms: 300,
        }
    }

    fn chain(
        scope: &Context,
        counting: &Arc<CountingRegistry>,
    ) -> (Arc<RefreshRegistry<NetworkServiceEndpoint>>, Arc<dyn RegistryServer<NetworkServiceEndpoint>>) {
        let refresh = Arc::new(RefreshRegistry::<NetworkServiceEndpoint>::new(scope, &config()));
        let chain = registry_chain::<NetworkServiceEndpoint>(vec![
            Arc::clone(&refresh) as Arc<dyn RegistryServer<NetworkServiceEndpoint>>,
            Arc::clone(counting) as Arc<dyn RegistryServer<NetworkServiceEndpoint>>,
        ]);
        (refresh, chain)
    }

    #[tokio::test(start_paused = true)]
    async fn reregisters_about_every_third_of_lifetime() {
        let scope = Context::background();
        let counting = Arc::new(CountingRegistry::default());
        let (refresh, chain) = chain(&scope, &counting);

        chain
            .register(&Context::background(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        // Initial registration plus one refresh every ~100ms.
        let count = counting.registrations.load(Ordering::SeqCst);
        assert!((3..=5).contains(&count), "registrations: {count}");
        assert_eq!(refresh.active(), 1);
        refresh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_stops_refreshing() {
        let scope = Context::background();
        let counting = Arc::new(CountingRegistry::default());
        let (refresh, chain) = chain(&scope, &counting);
        let ctx = Context::background();

        let nse = chain
            .register(&ctx, NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        chain.unregister(&ctx, nse).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(counting.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(counting.unregistrations.load(Ordering::SeqCst), 1);
        assert_eq!(refresh.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_is_retried() {
        let scope = Context::background();
        let counting = Arc::new(CountingRegistry {
            fail_on: vec![2, 3],
            ..CountingRegistry::default()
        });
        let (refresh, chain) = chain(&scope, &counting);

        chain
            .register(&Context::background(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        // First refresh at ~100ms fails twice, the retry 20ms later succeeds.
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(counting.registrations.load(Ordering::SeqCst), 4);
        assert_eq!(refresh.active(), 1);
        refresh.shutdown().await;
    }
}
