//! Registry entries: network services and the endpoints that provide them.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::connection::Labels;
use crate::domain;
use crate::error::Result;

// ---------------------------------------------------------------------------
// RegistryEntry
// ---------------------------------------------------------------------------

/// Behaviour shared by everything a registry stores.
///
/// Registries are generic over this trait so the same memory store, expiry
/// manager and federation elements serve both network services and
/// endpoints.
pub trait RegistryEntry: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Short label for logs and metrics (`"ns"`, `"nse"`).
    const KIND: &'static str;

    fn name(&self) -> &str;

    fn set_name(&mut self, name: String);

    fn expiration_time(&self) -> Option<SystemTime>;

    fn set_expiration_time(&mut self, expiration_time: Option<SystemTime>);

    /// True once the entry's expiration time has been reached.
    fn is_expired(&self) -> bool {
        self.expiration_time()
            .is_some_and(|expires| expires <= SystemTime::now())
    }

    /// Dial target advertised by the entry. Empty for entries without one.
    fn url(&self) -> &str {
        ""
    }

    /// True when `self` satisfies `query`. Empty query fields match anything.
    fn matches_query(&self, query: &Self) -> bool;

    /// Domain named by the entry, used to route federated calls.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed interdomain names.
    fn target_domain(&self) -> Result<Option<String>> {
        Ok(domain::domain_of(self.name())?.map(str::to_string))
    }

    /// Removes domain suffixes so the entry can be served by its own domain.
    fn strip_domain(&mut self) {
        let local = domain::strip(self.name()).to_string();
        self.set_name(local);
    }
}

fn contains_str(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.contains(needle)
}

// ---------------------------------------------------------------------------
// NetworkService
// ---------------------------------------------------------------------------

/// Destination of a match route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Labels an endpoint must carry for this service to be selected.
    pub destination_selector: Labels,
    pub weight: u32,
}

/// Routing rule: requesters satisfying `source_selector` are sent to the
/// endpoints picked by `routes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub source_selector: Labels,
    pub routes: Vec<Destination>,
    /// When set, a match that selects no endpoint lets evaluation continue
    /// with the next match instead of ending it.
    pub fallthrough: bool,
}

impl Match {
    #[must_use]
    pub fn new(source_selector: Labels, destinations: Vec<Labels>) -> Self {
        Self {
            source_selector,
            routes: destinations
                .into_iter()
                .map(|destination_selector| Destination {
                    destination_selector,
                    weight: 1,
                })
                .collect(),
            fallthrough: false,
        }
    }
}

/// Named service offering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkService {
    pub name: String,
    pub payload: String,
    /// Evaluated in order; the first satisfied match wins.
    pub matches: Vec<Match>,
    pub expiration_time: Option<SystemTime>,
}

impl NetworkService {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_matches(mut self, matches: Vec<Match>) -> Self {
        self.matches = matches;
        self
    }
}

impl RegistryEntry for NetworkService {
    const KIND: &'static str = "ns";

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn expiration_time(&self) -> Option<SystemTime> {
        self.expiration_time
    }

    fn set_expiration_time(&mut self, expiration_time: Option<SystemTime>) {
        self.expiration_time = expiration_time;
    }

    fn matches_query(&self, query: &Self) -> bool {
        contains_str(&self.name, &query.name) && contains_str(&self.payload, &query.payload)
    }
}

// ---------------------------------------------------------------------------
// NetworkServiceEndpoint
// ---------------------------------------------------------------------------

/// Registered provider of one or more network services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceEndpoint {
    /// Globally unique; may carry an `@domain` suffix.
    pub name: String,
    /// Dial target. Empty for entries that only serve as rendezvous.
    pub url: String,
    pub network_service_names: Vec<String>,
    /// Labels advertised per network service name.
    pub network_service_labels: BTreeMap<String, Labels>,
    pub expiration_time: Option<SystemTime>,
}

impl NetworkServiceEndpoint {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Adds `service` with the labels advertised for it.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>, labels: Labels) -> Self {
        let service = service.into();
        if !labels.is_empty() {
            self.network_service_labels.insert(service.clone(), labels);
        }
        self.network_service_names.push(service);
        self
    }

    /// Labels advertised for `service`; empty when none were given.
    #[must_use]
    pub fn labels_for(&self, service: &str) -> Labels {
        self.network_service_labels
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn offers(&self, service: &str) -> bool {
        self.network_service_names.iter().any(|name| name == service)
    }
}

impl RegistryEntry for NetworkServiceEndpoint {
    const KIND: &'static str = "nse";

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn expiration_time(&self) -> Option<SystemTime> {
        self.expiration_time
    }

    fn set_expiration_time(&mut self, expiration_time: Option<SystemTime>) {
        self.expiration_time = expiration_time;
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn matches_query(&self, query: &Self) -> bool {
        let services_match = query
            .network_service_names
            .iter()
            .all(|wanted| self.offers(wanted));
        let labels_match = query.network_service_labels.iter().all(|(service, wanted)| {
            let offered = self.labels_for(service);
            wanted
                .iter()
                .all(|(key, value)| offered.get(key) == Some(value))
        });
        contains_str(&self.name, &query.name)
            && contains_str(&self.url, &query.url)
            && services_match
            && labels_match
    }

    fn target_domain(&self) -> Result<Option<String>> {
        if let Some(found) = domain::domain_of(&self.name)? {
            return Ok(Some(found.to_string()));
        }
        for service in &self.network_service_names {
            if let Some(found) = domain::domain_of(service)? {
                return Ok(Some(found.to_string()));
            }
        }
        Ok(None)
    }

    fn strip_domain(&mut self) {
        self.name = domain::strip(&self.name).to_string();
        for service in &mut self.network_service_names {
            *service = domain::strip(service).to_string();
        }
        self.network_service_labels = std::mem::take(&mut self.network_service_labels)
            .into_iter()
            .map(|(service, labels)| (domain::strip(&service).to_string(), labels))
            .collect();
    }
}

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

/// Find request. `entry` is a template: empty fields act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query<T> {
    pub entry: T,
    /// Keep streaming changes after the initial snapshot.
    pub watch: bool,
}

impl<T> Query<T> {
    #[must_use]
    pub fn snapshot(entry: T) -> Self {
        Self {
            entry,
            watch: false,
        }
    }

    #[must_use]
    pub fn watch(entry: T) -> Self {
        Self { entry, watch: true }
    }
}

/// One item of a Find stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResponse<T> {
    pub item: T,
    /// The entry was removed from the registry.
    pub deleted: bool,
}

impl<T> FindResponse<T> {
    #[must_use]
    pub fn present(item: T) -> Self {
        Self {
            item,
            deleted: false,
        }
    }

    #[must_use]
    pub fn deleted(item: T) -> Self {
        Self {
            item,
            deleted: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
