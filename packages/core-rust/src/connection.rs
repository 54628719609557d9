//! Logical end-to-end connection and the request that carries it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::{Path, PathSegment};

/// Label set attached to requests, endpoints and selectors.
pub type Labels = BTreeMap<String, String>;

/// One logical flow between a client and a network service endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Stable across refresh and heal. Each hop rewrites it to its own
    /// segment id while it forwards the call.
    pub id: String,
    /// Requested network service name.
    pub network_service: String,
    /// Endpoint serving the connection. Set by the requester to pin an
    /// endpoint, or by discovery once one is selected.
    pub network_service_endpoint_name: String,
    /// Requester labels used for match evaluation.
    pub labels: Labels,
    /// Service payload type, copied from the network service when unset.
    pub payload: String,
    /// Opaque transport parameters.
    pub context: BTreeMap<String, String>,
    pub path: Path,
}

impl Connection {
    #[must_use]
    pub fn new(id: impl Into<String>, network_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels = labels
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, name: impl Into<String>) -> Self {
        self.network_service_endpoint_name = name.into();
        self
    }

    #[must_use]
    pub fn current_segment(&self) -> Option<&PathSegment> {
        self.path.current()
    }

    /// Enters the hop `name` (see [`Path::enter`]) and adopts its segment id.
    /// Returns the cursor position to hand to [`Connection::leave_hop`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path cursor is out of range.
    pub fn enter_hop(&mut self, name: &str) -> Result<usize> {
        let seed = self.id.clone();
        let empty = self.path.is_empty();
        let previous = self.path.enter(name, || {
            if empty && !seed.is_empty() {
                seed
            } else {
                uuid::Uuid::new_v4().to_string()
            }
        })?;
        if let Some(segment) = self.path.current() {
            self.id.clone_from(&segment.id);
        }
        Ok(previous)
    }

    /// Restores the cursor saved by [`Connection::enter_hop`].
    pub fn leave_hop(&mut self, previous: usize) {
        self.path.index = previous;
        if let Some(segment) = self.path.current() {
            self.id.clone_from(&segment.id);
        }
    }
}

/// Request travelling through a mesh chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkServiceRequest {
    pub connection: Connection,
}

impl NetworkServiceRequest {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

impl From<Connection> for NetworkServiceRequest {
    fn from(connection: Connection) -> Self {
        Self::new(connection)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
