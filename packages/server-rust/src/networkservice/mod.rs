//! Mesh chain elements.
//!
//! A typical client-facing chain reads, outermost first:
//!
//! ```text
//! updatepath -> refresh -> updatetoken -> timeout -> heal
//!            -> discover -> roundrobin -> connect
//! ```
//!
//! Elements share request-scoped state only through [`nsmesh_core::Context`]
//! values: discovery publishes [`Candidates`], selection publishes the
//! [`ClientUrl`] that `connect` dials.

pub mod connect;
pub mod discover;
pub mod heal;
pub mod refresh;
pub mod roundrobin;
pub mod timeout;
pub mod updatepath;
pub mod updatetoken;

pub use connect::ConnectServer;
pub use discover::{Candidates, ClientUrl, DiscoverServer};
pub use heal::{HealEvent, HealServer, HealState};
pub use refresh::RefreshServer;
pub use roundrobin::RoundRobinServer;
pub use timeout::TimeoutServer;
pub use updatepath::UpdatePathServer;
pub use updatetoken::UpdateTokenServer;
