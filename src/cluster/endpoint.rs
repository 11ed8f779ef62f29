//! Endpoint registry
//!
//! The registry is the immutable, ordered list of backend endpoints the
//! monitor watches. Registration order is significant: it is the tie-break
//! for master election and the first entry is the fallback master.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::ConfigError;

use super::handle::WorkHandle;

// ============================================================================
// Endpoint
// ============================================================================

/// One configured backend server
///
/// Identity is the `host:port` address; the health port and the work handle
/// do not take part in equality.
#[derive(Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    health_port: u16,
    handle: Arc<dyn WorkHandle>,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    /// Address used as identity (`host:port`)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Liveness URL on the health port
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/healthz", self.host, self.health_port)
    }

    pub fn handle(&self) -> &Arc<dyn WorkHandle> {
        &self.handle
    }

    fn same_address(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host == host
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.same_address(&other.host, other.port)
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("health_port", &self.health_port)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Endpoint Spec
// ============================================================================

/// Unvalidated endpoint description
///
/// Ports are carried wide so out-of-range values coming from configuration
/// can be rejected with a proper error instead of silently truncated.
#[derive(Clone, Default)]
pub struct EndpointSpec {
    pub host: String,
    pub port: u32,
    pub health_port: u32,
    pub handle: Option<Arc<dyn WorkHandle>>,
}

impl EndpointSpec {
    pub fn new(host: impl Into<String>, port: u32, health_port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            health_port,
            handle: None,
        }
    }

    /// Attach the work handle
    pub fn with_handle(mut self, handle: Arc<dyn WorkHandle>) -> Self {
        self.handle = Some(handle);
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(self) -> Result<Endpoint, ConfigError> {
        if let Err(e) = url::Host::parse(&self.host) {
            return Err(ConfigError::InvalidAddress {
                address: self.address(),
                reason: e.to_string(),
            });
        }

        let port = checked_port(&self.host, self.port)?;
        let health_port = checked_port(&self.host, self.health_port)?;

        let handle = self.handle.ok_or_else(|| ConfigError::MissingWorkHandle {
            address: format!("{}:{}", self.host, port),
        })?;

        Ok(Endpoint {
            host: self.host,
            port,
            health_port,
            handle,
        })
    }
}

impl fmt::Debug for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("health_port", &self.health_port)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

fn checked_port(host: &str, port: u32) -> Result<u16, ConfigError> {
    u16::try_from(port).map_err(|_| ConfigError::PortOutOfRange {
        host: host.to_string(),
        port,
    })
}

// ============================================================================
// Endpoint Registry
// ============================================================================

/// Immutable, non-empty, ordered list of endpoints
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Validate and freeze an endpoint list
    pub fn new(specs: Vec<EndpointSpec>) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::EmptyEndpoints);
        }

        let mut seen = HashSet::with_capacity(specs.len());
        let mut endpoints = Vec::with_capacity(specs.len());

        for spec in specs {
            let endpoint = spec.validate()?;
            if !seen.insert(endpoint.address()) {
                return Err(ConfigError::DuplicateEndpoint {
                    address: endpoint.address(),
                });
            }
            endpoints.push(endpoint);
        }

        tracing::debug!(count = endpoints.len(), "Endpoint registry created");
        Ok(Self { endpoints })
    }

    /// All endpoints in registration order
    pub fn all(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// First registered endpoint, the fallback master
    pub fn default_endpoint(&self) -> &Endpoint {
        // Non-empty is checked in `new`
        &self.endpoints[0]
    }

    /// Look up an endpoint by `host:port`
    pub fn get(&self, address: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.address() == address)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.iter().any(|e| e == endpoint)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
