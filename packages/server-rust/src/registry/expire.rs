//! Registry-side TTL enforcement.
//!
//! Every registration passing through gets an expiration no later than the
//! configured ceiling and a timer that unregisters it through the rest of
//! the chain when that time comes. Re-registering the same name replaces
//! the timer. A per-name lock orders register, unregister and eviction so
//! a refresh racing an eviction either cancels it or re-creates the entry
//! after it. Find never reports an entry whose expiration has passed.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use metrics::counter;
use nsmesh_core::{duration_until, Context, Query, RegistryEntry, Result};
use tracing::{debug, warn};

use crate::chain::{next_registry, Next};
use crate::config::ExpireConfig;
use crate::tools::{KeyedLock, TimerSet};
use crate::traits::{FindSink, RegistryServer};

struct Shared {
    max_ttl: Duration,
    eviction_timeout: Duration,
    timers: TimerSet,
    locks: KeyedLock,
}

/// Expiration manager for one registry chain.
pub struct ExpireRegistry<T: RegistryEntry> {
    shared: Arc<Shared>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: RegistryEntry> ExpireRegistry<T> {
    /// Timers run under `scope`; cancelling it stops every pending eviction.
    #[must_use]
    pub fn new(scope: &Context, config: &ExpireConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_ttl: config.max_ttl(),
                eviction_timeout: config.eviction_timeout(),
                timers: TimerSet::new(scope),
                locks: KeyedLock::new(),
            }),
            _entry: PhantomData,
        }
    }

    /// Number of entries with a pending eviction.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.timers.len()
    }

    /// Stops every eviction timer and waits for running ones.
    pub async fn shutdown(&self) {
        self.shared.timers.shutdown().await;
    }

    fn effective_expiration(&self, requested: Option<SystemTime>) -> SystemTime {
        let ceiling = SystemTime::now() + self.shared.max_ttl;
        match requested {
            Some(requested) if requested < ceiling => requested,
            _ => ceiling,
        }
    }

    fn schedule_eviction(
        &self,
        ctx: &Context,
        name: &str,
        entry: T,
        next: Next<dyn RegistryServer<T>>,
        expires: SystemTime,
    ) {
        let shared = Arc::clone(&self.shared);
        let key = name.to_string();
        let replay = ctx.rebase(self.shared.timers.scope());
        self.shared
            .timers
            .arm(name, duration_until(expires), move |ticket| async move {
                let _guard = shared.locks.lock(&key).await;
                if !shared.timers.take_if_current(&key, ticket.generation) {
                    return;
                }
                let ctx = replay.with_timeout(shared.eviction_timeout);
                match next.unregister(&ctx, entry).await {
                    Ok(()) => {
                        counter!("nsmesh_expire_evictions_total", "kind" => T::KIND).increment(1);
                        debug!(kind = T::KIND, name = %key, "registration expired");
                    }
                    Err(err) => {
                        counter!("nsmesh_expire_eviction_failures_total", "kind" => T::KIND)
                            .increment(1);
                        warn!(kind = T::KIND, name = %key, error = %err, "eviction unregister failed");
                    }
                }
            });
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for ExpireRegistry<T> {
    async fn register(&self, ctx: &Context, mut entry: T) -> Result<T> {
        let next = next_registry::<T>(ctx);
        let name = entry.name().to_string();
        if name.is_empty() {
            return next.register(ctx, entry).await;
        }

        let _guard = self.shared.locks.lock(&name).await;
        let expires = self.effective_expiration(entry.expiration_time());
        entry.set_expiration_time(Some(expires));

        let mut registered = next.register(ctx, entry).await?;

        // Downstream managers may only shorten the lifetime.
        let expires = registered
            .expiration_time()
            .map_or(expires, |downstream| downstream.min(expires));
        registered.set_expiration_time(Some(expires));

        self.schedule_eviction(ctx, &name, registered.clone(), next, expires);
        Ok(registered)
    }

    /// Entries past their expiration are dropped from results even while
    /// their eviction is pending or has failed. Deletions always pass.
    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        let next = next_registry::<T>(ctx);
        let (inner, mut rx) = FindSink::channel();
        let find = next.find(ctx, query, inner);
        let forward = async {
            while let Some(item) = rx.recv().await {
                let response = match item {
                    Ok(response) => response,
                    Err(err) => {
                        sink.fail(err).await;
                        return;
                    }
                };
                if !response.deleted && response.item.is_expired() {
                    debug!(
                        kind = T::KIND,
                        name = response.item.name(),
                        "expired entry hidden from find"
                    );
                    continue;
                }
                if sink.send(response).await.is_err() {
                    return;
                }
            }
        };
        let (result, ()) = tokio::join!(find, forward);
        result
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        let _guard = self.shared.locks.lock(entry.name()).await;
        self.shared.timers.cancel(entry.name());
        next_registry::<T>(ctx).unregister(ctx, entry).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
