//! Collaborator seams: token issuing and domain-to-registry resolution,
//! each with a simple in-process implementation.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// Maps a domain name to the address of that domain's registry.
/// Implementations: DNS SRV lookups, static tables (tests, small deployments).
#[async_trait]
pub trait DomainResolver: Send + Sync {
    /// Registry address serving `domain`, or `None` when it does not resolve.
    async fn resolve(&self, domain: &str) -> Option<String>;
}

/// Issues the opaque token a hop stamps onto its path segment.
pub trait TokenGenerator: Send + Sync {
    /// Token and the instant it stops being valid.
    ///
    /// # Errors
    ///
    /// Implementations fail when no credential can be produced for `ctx`.
    fn generate(&self, ctx: &Context) -> Result<(String, SystemTime)>;
}

/// Fixed domain table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, String>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, domain: impl Into<String>, address: impl Into<String>) -> Self {
        self.table.insert(domain.into(), address.into());
        self
    }
}

#[async_trait]
impl DomainResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Option<String> {
        self.table.get(domain).cloned()
    }
}

/// Generates random tokens valid for a fixed lifetime.
#[derive(Debug, Clone, Copy)]
pub struct LifetimeTokenGenerator {
    lifetime: Duration,
}

impl LifetimeTokenGenerator {
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }
}

impl TokenGenerator for LifetimeTokenGenerator {
    fn generate(&self, _ctx: &Context) -> Result<(String, SystemTime)> {
        Ok((
            uuid::Uuid::new_v4().to_string(),
            SystemTime::now() + self.lifetime,
        ))
    }
}
