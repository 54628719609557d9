//! nsmesh core: connection and registry model, label selectors, interdomain
//! names, the error taxonomy and the request-scoped [`Context`].

pub mod connection;
pub mod context;
pub mod domain;
pub mod error;
pub mod path;
pub mod registry;
pub mod selector;
pub mod traits;

pub use connection::{Connection, Labels, NetworkServiceRequest};
pub use context::{duration_until, Context};
pub use error::{ErrorKind, MeshError, Result, Stage};
pub use path::{Path, PathSegment};
pub use registry::{
    Destination, FindResponse, Match, NetworkService, NetworkServiceEndpoint, Query,
    RegistryEntry,
};
pub use traits::{DomainResolver, LifetimeTokenGenerator, StaticResolver, TokenGenerator};
