//! Registry federation across domains.
//!
//! Two elements split the work. [`ProxyRegistry`] sits in every domain's
//! local registry and ships calls naming another domain to the proxy
//! registry unchanged. [`InterdomainRegistry`] runs in the proxy registry:
//! it resolves the named domain to that domain's registry, forwards the
//! call with the suffix stripped and rewrites answers so they stay
//! addressable from the caller's side. A name suffixed with the element's
//! own domain is always served locally, which keeps resolution from
//! looping.

use std::sync::Arc;

use async_trait::async_trait;
use nsmesh_core::{domain, Context, DomainResolver, MeshError, Query, RegistryEntry, Result, Stage};
use tracing::debug;

use crate::adapters::pump;
use crate::chain::{isolate_registry, next_registry};
use crate::traits::{FindSink, RegistryClient, RegistryDialer, RegistryServer};

/// Where a call should go, judged from the entry's domain suffix.
enum Route {
    /// No suffix: serve here.
    Local,
    /// Own suffix: strip it and serve here.
    Own,
    /// Another domain.
    Foreign(String),
}

fn route<T: RegistryEntry>(local_domain: &str, entry: &T) -> Result<Route> {
    let target = entry
        .target_domain()
        .map_err(|err| err.at(Stage::Interdomain))?;
    Ok(match target {
        None => Route::Local,
        Some(found) if found == local_domain => Route::Own,
        Some(found) => Route::Foreign(found),
    })
}

fn stripped<T: RegistryEntry>(mut entry: T) -> T {
    entry.strip_domain();
    entry
}

async fn dial<T: RegistryEntry>(
    dialer: &Arc<dyn RegistryDialer<T>>,
    ctx: &Context,
    url: &str,
) -> Result<Arc<dyn RegistryClient<T>>> {
    dialer
        .dial(ctx, url)
        .await
        .map_err(|err| err.at(Stage::Interdomain))
}

// ---------------------------------------------------------------------------
// ProxyRegistry
// ---------------------------------------------------------------------------

/// Local-registry element forwarding foreign-domain calls to the proxy.
pub struct ProxyRegistry<T: RegistryEntry> {
    local_domain: String,
    proxy_url: String,
    dialer: Arc<dyn RegistryDialer<T>>,
}

impl<T: RegistryEntry> ProxyRegistry<T> {
    #[must_use]
    pub fn new(
        local_domain: impl Into<String>,
        proxy_url: impl Into<String>,
        dialer: Arc<dyn RegistryDialer<T>>,
    ) -> Self {
        Self {
            local_domain: local_domain.into(),
            proxy_url: proxy_url.into(),
            dialer,
        }
    }

    async fn proxy(&self, ctx: &Context) -> Result<Arc<dyn RegistryClient<T>>> {
        if self.proxy_url.is_empty() {
            return Err(MeshError::Unavailable("no proxy registry configured".into())
                .at(Stage::Interdomain));
        }
        dial(&self.dialer, ctx, &self.proxy_url).await
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for ProxyRegistry<T> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        match route(&self.local_domain, &entry)? {
            Route::Local => next_registry::<T>(ctx).register(ctx, entry).await,
            Route::Own => next_registry::<T>(ctx).register(ctx, stripped(entry)).await,
            Route::Foreign(_) => {
                let proxy = self.proxy(ctx).await?;
                proxy
                    .register(&isolate_registry::<T>(ctx), entry)
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))
            }
        }
    }

    async fn find(&self, ctx: &Context, mut query: Query<T>, sink: FindSink<T>) -> Result<()> {
        match route(&self.local_domain, &query.entry)? {
            Route::Local => next_registry::<T>(ctx).find(ctx, query, sink).await,
            Route::Own => {
                query.entry.strip_domain();
                next_registry::<T>(ctx).find(ctx, query, sink).await
            }
            Route::Foreign(_) => {
                let proxy = self.proxy(ctx).await?;
                let stream = proxy
                    .find(&isolate_registry::<T>(ctx), query)
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))?;
                pump(ctx, stream, &sink, |response| response)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.at(Stage::Interdomain))
            }
        }
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        match route(&self.local_domain, &entry)? {
            Route::Local => next_registry::<T>(ctx).unregister(ctx, entry).await,
            Route::Own => next_registry::<T>(ctx).unregister(ctx, stripped(entry)).await,
            Route::Foreign(_) => {
                let proxy = self.proxy(ctx).await?;
                proxy
                    .unregister(&isolate_registry::<T>(ctx), entry)
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// InterdomainRegistry
// ---------------------------------------------------------------------------

/// Proxy-registry element resolving domains and forwarding across them.
pub struct InterdomainRegistry<T: RegistryEntry> {
    local_domain: String,
    resolver: Arc<dyn DomainResolver>,
    dialer: Arc<dyn RegistryDialer<T>>,
}

impl<T: RegistryEntry> InterdomainRegistry<T> {
    #[must_use]
    pub fn new(
        local_domain: impl Into<String>,
        resolver: Arc<dyn DomainResolver>,
        dialer: Arc<dyn RegistryDialer<T>>,
    ) -> Self {
        Self {
            local_domain: local_domain.into(),
            resolver,
            dialer,
        }
    }

    /// Registry client for `domain`.
    async fn remote(&self, ctx: &Context, target: &str) -> Result<Arc<dyn RegistryClient<T>>> {
        let Some(url) = self.resolver.resolve(target).await else {
            return Err(MeshError::NotFound(format!("domain {target} does not resolve"))
                .at(Stage::Interdomain));
        };
        debug!(domain = target, registry = %url, kind = T::KIND, "forwarding to domain registry");
        dial(&self.dialer, ctx, &url).await
    }
}

/// Name a remote answer is reported under: `<name>@<url>`, or
/// `<name>@<domain>` when the entry advertises no URL.
fn remote_name<T: RegistryEntry>(entry: &T, target: &str) -> String {
    let local = domain::strip(entry.name());
    if entry.url().is_empty() {
        domain::join(local, target)
    } else {
        domain::join(local, entry.url())
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for InterdomainRegistry<T> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        match route(&self.local_domain, &entry)? {
            Route::Local => next_registry::<T>(ctx).register(ctx, entry).await,
            Route::Own => next_registry::<T>(ctx).register(ctx, stripped(entry)).await,
            Route::Foreign(target) => {
                let remote = self.remote(ctx, &target).await?;
                let mut registered = remote
                    .register(&isolate_registry::<T>(ctx), stripped(entry))
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))?;
                let name = domain::join(domain::strip(registered.name()), &target);
                registered.set_name(name);
                Ok(registered)
            }
        }
    }

    async fn find(&self, ctx: &Context, mut query: Query<T>, sink: FindSink<T>) -> Result<()> {
        match route(&self.local_domain, &query.entry)? {
            Route::Local => next_registry::<T>(ctx).find(ctx, query, sink).await,
            Route::Own => {
                query.entry.strip_domain();
                next_registry::<T>(ctx).find(ctx, query, sink).await
            }
            Route::Foreign(target) => {
                let remote = self.remote(ctx, &target).await?;
                query.entry.strip_domain();
                let stream = remote
                    .find(&isolate_registry::<T>(ctx), query)
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))?;
                pump(ctx, stream, &sink, |mut response| {
                    let name = remote_name(&response.item, &target);
                    response.item.set_name(name);
                    response
                })
                .await
                .map(|_| ())
                .map_err(|err| err.at(Stage::Interdomain))
            }
        }
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        match route(&self.local_domain, &entry)? {
            Route::Local => next_registry::<T>(ctx).unregister(ctx, entry).await,
            Route::Own => next_registry::<T>(ctx).unregister(ctx, stripped(entry)).await,
            Route::Foreign(target) => {
                let remote = self.remote(ctx, &target).await?;
                remote
                    .unregister(&isolate_registry::<T>(ctx), stripped(entry))
                    .await
                    .map_err(|err| err.at(Stage::Interdomain))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
