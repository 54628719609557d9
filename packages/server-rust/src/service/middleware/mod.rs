//! Tower middleware layers for the call pipeline.
//!
//! - [`load_shed`]: Request admission budget (Closes always pass)
//! - [`timeout`]: Per-call deadline enforcement
//! - [`metrics`]: Call timing and counting
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_call_pipeline;
pub use timeout::TimeoutLayer;
