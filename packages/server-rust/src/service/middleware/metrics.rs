//! Metrics middleware for mesh calls.
//!
//! Wraps every call in a `mesh_call` span carrying its duration and outcome,
//! and counts calls by kind and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use metrics::counter;
use nsmesh_core::MeshError;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::call::{MeshCall, MeshResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label: `"ok"` or the error's kind.
fn outcome(result: &Result<MeshResponse, MeshError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind().as_str(),
    }
}

impl<S> Service<MeshCall> for MetricsService<S>
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
        let kind = call.kind();
        let connection_id = call.connection_id().to_string();

        let span = info_span!(
            "mesh_call",
            kind = kind,
            connection_id = %connection_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = outcome(&result);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                counter!("nsmesh_calls_total", "kind" => kind, "outcome" => outcome).increment(1);

                tracing::info!(
                    kind = kind,
                    connection_id = %connection_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "mesh call complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
