//! Client-facing call pipeline.
//!
//! A mesh chain exposed as a `tower::Service`:
//!
//! 1. **Calls** (`call`): [`MeshCall`] in, [`MeshResponse`] out, and
//!    [`ChainService`] which hands each call to the chain
//! 2. **Middleware** (`middleware`): tower layers (load shedding, deadline,
//!    tracing and metrics) composed by [`build_call_pipeline`]

pub mod call;
pub mod middleware;

pub use call::{ChainService, MeshCall, MeshResponse};
pub use middleware::build_call_pipeline;
