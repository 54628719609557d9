//! In-memory registry store with watch subscriptions.

use async_trait::async_trait;
use dashmap::DashMap;
use nsmesh_core::{Context, FindResponse, MeshError, Query, RegistryEntry, Result};
use tokio::sync::broadcast;
use tracing::debug;

use crate::chain::next_registry;
use crate::traits::{FindSink, RegistryServer};

/// Watch events buffered per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Terminal store of a registry chain. Keeps entries by name and fans
/// every change out to watching Find calls.
pub struct MemoryRegistry<T: RegistryEntry> {
    entries: DashMap<String, T>,
    events: broadcast::Sender<FindResponse<T>>,
}

impl<T: RegistryEntry> MemoryRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: DashMap::new(),
            events,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<T> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    fn snapshot(&self, query: &T) -> Vec<T> {
        self.entries
            .iter()
            .filter(|entry| entry.value().matches_query(query))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl<T: RegistryEntry> Default for MemoryRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for MemoryRegistry<T> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        if entry.name().is_empty() {
            return Err(MeshError::InvalidArgument(format!(
                "{} registration without a name",
                T::KIND
            )));
        }
        let stored = next_registry::<T>(ctx).register(ctx, entry).await?;
        self.entries
            .insert(stored.name().to_string(), stored.clone());
        debug!(kind = T::KIND, name = stored.name(), "registered");
        let _ = self.events.send(FindResponse::present(stored.clone()));
        Ok(stored)
    }

    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        // Subscribe before the snapshot so no change falls between the two.
        let mut events = query.watch.then(|| self.events.subscribe());

        for entry in self.snapshot(&query.entry) {
            if sink.send(FindResponse::present(entry)).await.is_err() {
                return Ok(());
            }
        }

        let Some(events) = events.as_mut() else {
            return next_registry::<T>(ctx).find(ctx, query, sink).await;
        };

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = ctx.done() => return Ok(()),
            };
            match event {
                Ok(event) if event.item.matches_query(&query.entry) => {
                    if sink.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        if let Some((_, removed)) = self.entries.remove(entry.name()) {
            debug!(kind = T::KIND, name = removed.name(), "unregistered");
            let _ = self.events.send(FindResponse::deleted(removed));
        }
        next_registry::<T>(ctx).unregister(ctx, entry).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
