//! Admission control for mesh calls.
//!
//! Requests (new connections and refreshes alike) draw from a fixed budget
//! of in-flight slots. Once the budget is spent further Requests are shed
//! with `Unavailable` at [`Stage::Admission`] instead of queueing behind the
//! chain. Closes bypass the budget so teardown runs under any load.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use metrics::counter;
use nsmesh_core::{MeshError, Stage};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::call::{MeshCall, MeshResponse};

/// In-flight Request slots shared by a layer and every service it wraps.
#[derive(Debug, Clone)]
struct Budget {
    slots: Arc<Semaphore>,
    limit: u32,
}

impl Budget {
    fn new(limit: u32) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(limit as usize)),
            limit,
        }
    }

    fn in_flight(&self) -> usize {
        (self.limit as usize).saturating_sub(self.slots.available_permits())
    }

    /// Slot for `call`, `Ok(None)` when the call does not need one.
    fn admit(&self, call: &MeshCall) -> Result<Option<OwnedSemaphorePermit>, MeshError> {
        if matches!(call, MeshCall::Close { .. }) {
            return Ok(None);
        }
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                counter!("nsmesh_calls_shed_total", "kind" => call.kind()).increment(1);
                warn!(
                    connection_id = %call.connection_id(),
                    limit = self.limit,
                    "request shed"
                );
                Err(MeshError::Unavailable(format!(
                    "{} requests already in flight",
                    self.limit
                ))
                .at(Stage::Admission))
            }
        }
    }
}

/// Layer bounding the Requests a pipeline runs at once.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    budget: Budget,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_in_flight_requests: u32) -> Self {
        Self {
            budget: Budget::new(max_in_flight_requests),
        }
    }

    /// Requests currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.budget.in_flight()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            budget: self.budget.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    budget: Budget,
}

impl<S> Service<MeshCall> for LoadShedService<S>
where
    S: Service<MeshCall, Response = MeshResponse, Error = MeshError> + Send,
    S::Future: Send + 'static,
{
    type Response = MeshResponse;
    type Error = MeshError;
    type Future = Pin<Box<dyn Future<Output = Result<MeshResponse, MeshError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: MeshCall) -> Self::Future {
        let slot = match self.budget.admit(&call) {
            Ok(slot) => slot,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            drop(slot);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
