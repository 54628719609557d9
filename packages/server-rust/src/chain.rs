//! Chain runtime: ordered composition of elements with forward and unwind
//! semantics.
//!
//! The continuation ("what runs after me") travels in the [`Context`] as a
//! [`Next`] cursor rather than being bound into the elements, so one element
//! instance can sit in several chains and a chain nests inside another as an
//! ordinary element: its last element continues into the enclosing chain.

use std::sync::Arc;

use async_trait::async_trait;
use nsmesh_core::{
    Connection, Context, NetworkServiceRequest, Query, RegistryEntry, Result,
};

use crate::traits::{FindSink, NetworkServiceServer, RegistryServer};

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Cursor into a chain: the element to run next plus the enclosing chain's
/// continuation. Also usable as an element handle: calling it runs the rest
/// of the chain, which is how background timers replay calls later.
pub struct Next<E: ?Sized> {
    elements: Arc<[Arc<E>]>,
    position: usize,
    tail: Option<Arc<Next<E>>>,
}

impl<E: ?Sized> Clone for Next<E> {
    fn clone(&self) -> Self {
        Self {
            elements: Arc::clone(&self.elements),
            position: self.position,
            tail: self.tail.clone(),
        }
    }
}

impl<E: ?Sized + Send + Sync + 'static> Next<E> {
    /// Cursor with nothing left to run.
    #[must_use]
    pub fn terminal() -> Self {
        Self {
            elements: Arc::from(Vec::<Arc<E>>::new()),
            position: 0,
            tail: None,
        }
    }

    /// Continuation stored in `ctx`, or a terminal one.
    #[must_use]
    pub fn from_context(ctx: &Context) -> Self {
        ctx.value::<Self>().cloned().unwrap_or_else(Self::terminal)
    }

    fn start(elements: &Arc<[Arc<E>]>, ctx: &Context) -> Self {
        Self {
            elements: Arc::clone(elements),
            position: 0,
            tail: Some(Arc::new(Self::from_context(ctx))),
        }
    }

    /// Element to run and the cursor it should see as its own next.
    fn step(&self) -> Option<(Arc<E>, Self)> {
        match self.elements.get(self.position) {
            Some(element) => Some((
                Arc::clone(element),
                Self {
                    elements: Arc::clone(&self.elements),
                    position: self.position + 1,
                    tail: self.tail.clone(),
                },
            )),
            None => self.tail.as_ref().and_then(|tail| tail.step()),
        }
    }
}

/// Rest of the mesh chain for the element handling `ctx`.
#[must_use]
pub fn next_server(ctx: &Context) -> Next<dyn NetworkServiceServer> {
    Next::from_context(ctx)
}

/// Rest of the registry chain for the element handling `ctx`.
#[must_use]
pub fn next_registry<T: RegistryEntry>(ctx: &Context) -> Next<dyn RegistryServer<T>> {
    Next::from_context(ctx)
}

/// Context for calling into another chain (a dialed peer, a registry
/// client) so that chain ends on its own instead of continuing into ours.
#[must_use]
pub fn isolate(ctx: &Context) -> Context {
    ctx.with_value(Next::<dyn NetworkServiceServer>::terminal())
}

/// Registry counterpart of [`isolate`].
#[must_use]
pub fn isolate_registry<T: RegistryEntry>(ctx: &Context) -> Context {
    ctx.with_value(Next::<dyn RegistryServer<T>>::terminal())
}

#[async_trait]
impl NetworkServiceServer for Next<dyn NetworkServiceServer> {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        match self.step() {
            Some((element, rest)) => element.request(&ctx.with_value(rest), request).await,
            None => Ok(request.connection),
        }
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        match self.step() {
            Some((element, rest)) => element.close(&ctx.with_value(rest), connection).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for Next<dyn RegistryServer<T>> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        match self.step() {
            Some((element, rest)) => element.register(&ctx.with_value(rest), entry).await,
            None => Ok(entry),
        }
    }

    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        match self.step() {
            Some((element, rest)) => element.find(&ctx.with_value(rest), query, sink).await,
            None => Ok(()),
        }
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        match self.step() {
            Some((element, rest)) => element.unregister(&ctx.with_value(rest), entry).await,
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Ordered list of elements exposed as a single element.
pub struct Chain<E: ?Sized> {
    elements: Arc<[Arc<E>]>,
}

impl<E: ?Sized> Clone for Chain<E> {
    fn clone(&self) -> Self {
        Self {
            elements: Arc::clone(&self.elements),
        }
    }
}

impl<E: ?Sized> Chain<E> {
    #[must_use]
    pub fn new(elements: Vec<Arc<E>>) -> Self {
        Self {
            elements: Arc::from(elements),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Mesh chain built from a list of elements.
#[must_use]
pub fn server_chain(elements: Vec<Arc<dyn NetworkServiceServer>>) -> Arc<dyn NetworkServiceServer> {
    Arc::new(Chain::new(elements))
}

/// Registry chain built from a list of elements.
#[must_use]
pub fn registry_chain<T: RegistryEntry>(
    elements: Vec<Arc<dyn RegistryServer<T>>>,
) -> Arc<dyn RegistryServer<T>> {
    Arc::new(Chain::new(elements))
}

#[async_trait]
impl NetworkServiceServer for Chain<dyn NetworkServiceServer> {
    async fn request(&self, ctx: &Context, request: NetworkServiceRequest) -> Result<Connection> {
        Next::start(&self.elements, ctx).request(ctx, request).await
    }

    async fn close(&self, ctx: &Context, connection: Connection) -> Result<()> {
        Next::start(&self.elements, ctx).close(ctx, connection).await
    }
}

#[async_trait]
impl<T: RegistryEntry> RegistryServer<T> for Chain<dyn RegistryServer<T>> {
    async fn register(&self, ctx: &Context, entry: T) -> Result<T> {
        Next::start(&self.elements, ctx).register(ctx, entry).await
    }

    async fn find(&self, ctx: &Context, query: Query<T>, sink: FindSink<T>) -> Result<()> {
        Next::start(&self.elements, ctx).find(ctx, query, sink).await
    }

    async fn unregister(&self, ctx: &Context, entry: T) -> Result<()> {
        Next::start(&self.elements, ctx).unregister(ctx, entry).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
