//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use nsmesh_core::MeshError;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::config::PipelineConfig;
use crate::service::call::{ChainService, MeshCall, MeshResponse};
use crate::traits::NetworkServiceServer;

/// Build the call pipeline by wrapping `chain` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- shed Requests beyond the in-flight budget
/// 2. `TimeoutLayer` -- put the call deadline on the context
/// 3. `MetricsLayer` -- span, timing and outcome counters
#[must_use]
pub fn build_call_pipeline(
    chain: Arc<dyn NetworkServiceServer>,
    config: &PipelineConfig,
) -> impl tower::Service<MeshCall, Response = MeshResponse, Error = MeshError> + Clone {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_calls))
        .layer(TimeoutLayer::new(config.call_timeout()))
        .layer(MetricsLayer)
        .service(ChainService::new(chain))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
