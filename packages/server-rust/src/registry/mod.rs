//! Registry chain elements, generic over [`nsmesh_core::RegistryEntry`] so
//! network services and endpoints share one implementation.

pub mod expire;
pub mod interdomain;
pub mod memory;
pub mod refresh;
pub mod setid;

pub use expire::ExpireRegistry;
pub use interdomain::{InterdomainRegistry, ProxyRegistry};
pub use memory::MemoryRegistry;
pub use refresh::RefreshRegistry;
pub use setid::SetIdRegistry;
