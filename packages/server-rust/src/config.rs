//! Runtime configuration for the mesh and registry elements.
//!
//! Durations are carried as milliseconds so a JSON document maps onto the
//! structs directly; accessors convert to [`Duration`].

use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

/// Registry-side expiration limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpireConfig {
    /// Ceiling applied to every requested registration lifetime.
    pub max_ttl_ms: u64,
    /// Budget for the Unregister issued when an entry expires.
    pub eviction_timeout_ms: u64,
}

impl ExpireConfig {
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        Duration::from_millis(self.max_ttl_ms)
    }

    #[must_use]
    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_timeout_ms)
    }
}

impl Default for ExpireConfig {
    fn default() -> Self {
        Self {
            max_ttl_ms: 60_000,
            eviction_timeout_ms: 15_000,
        }
    }
}

/// Client-side refresh behaviour for connections and registrations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Delay between attempts after a failed refresh.
    pub retry_interval_ms: u64,
    /// Lower bound on the delay before any refresh.
    pub min_interval_ms: u64,
    /// Lifetime requested for registrations that do not ask for one.
    pub default_registration_ttl_ms: u64,
}

impl RefreshConfig {
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    #[must_use]
    pub fn default_registration_ttl(&self) -> Duration {
        Duration::from_millis(self.default_registration_ttl_ms)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 200,
            min_interval_ms: 10,
            default_registration_ttl_ms: 60_000,
        }
    }
}

/// Heal coordinator limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    /// Total time a heal may spend re-discovering before the connection
    /// is declared failed.
    pub heal_timeout_ms: u64,
    /// Delay between reconnection attempts.
    pub retry_interval_ms: u64,
    /// Budget for a single reconnection attempt, discovery wait included.
    pub attempt_timeout_ms: u64,
}

impl HealConfig {
    #[must_use]
    pub fn heal_timeout(&self) -> Duration {
        Duration::from_millis(self.heal_timeout_ms)
    }

    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            heal_timeout_ms: 60_000,
            retry_interval_ms: 100,
            attempt_timeout_ms: 5_000,
        }
    }
}

/// Discovery behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverConfig {
    /// Wait (until the request deadline) for a matching endpoint to register
    /// instead of failing as soon as the snapshot comes back empty.
    pub watch_for_endpoints: bool,
    /// Pause before re-running selection after a retriable downstream
    /// failure.
    pub retry_interval_ms: u64,
}

impl DiscoverConfig {
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            watch_for_endpoints: true,
            retry_interval_ms: 100,
        }
    }
}

/// Client-facing call pipeline limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline applied to every Request/Close entering the pipeline.
    pub call_timeout_ms: u64,
    /// Requests in flight before new ones are shed. Closes are never shed.
    pub max_concurrent_calls: u32,
}

impl PipelineConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            max_concurrent_calls: 1000,
        }
    }
}

/// Registry federation settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InterdomainConfig {
    /// Domain served by this registry. Names suffixed with it are local.
    pub local_domain: String,
    /// Registry that handles names of other domains. Empty disables proxying.
    pub proxy_url: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Name this node stamps on its path segments.
    pub name: String,
    pub expire: ExpireConfig,
    pub refresh: RefreshConfig,
    pub heal: HealConfig,
    pub discover: DiscoverConfig,
    pub pipeline: PipelineConfig,
    pub interdomain: InterdomainConfig,
}

impl MeshConfig {
    /// Parses a JSON document. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid configuration document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid mesh configuration")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
