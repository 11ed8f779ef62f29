//! Configuration for the cluster monitor
//!
//! Two layers:
//! - [`MonitorConfig`] controls the background loop (interval, timeouts, concurrency)
//! - [`ClusterConfig`] is the file/env form describing endpoints, the optional
//!   capability probe and the monitor settings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cluster::{EndpointRegistry, EndpointSpec, ProbeSpec, WorkHandle};

/// Default health port exposed by the query service
pub const DEFAULT_HEALTH_PORT: u32 = 9091;

/// Default distance metric for the capability probe
pub const DEFAULT_METRIC_TYPE: &str = "L2";

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors, fatal at construction time
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Endpoint list must not be empty")]
    EmptyEndpoints,

    #[error("Invalid endpoint address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Port {port} for host '{host}' is outside 0..=65535")]
    PortOutOfRange { host: String, port: u32 },

    #[error("No work handle supplied for endpoint {address}")]
    MissingWorkHandle { address: String },

    #[error("Endpoint {address} is registered more than once")]
    DuplicateEndpoint { address: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Monitor Config
// ============================================================================

/// Settings for the background monitor loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Run the background monitor at all
    pub enabled: bool,

    /// Seconds between the start of consecutive cycles
    pub check_interval_secs: u64,

    /// Connect and request timeout for the liveness probe
    pub liveness_timeout_secs: u64,

    /// Deadline for the capability probe search
    pub capability_timeout_secs: u64,

    /// Endpoints probed concurrently within one cycle (1 = sequential)
    pub max_concurrent_probes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 10,
            liveness_timeout_secs: 5,
            capability_timeout_secs: 4,
            max_concurrent_probes: 8,
        }
    }
}

impl MonitorConfig {
    /// Create a new config builder
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("check_interval_secs", self.check_interval_secs),
            ("liveness_timeout_secs", self.liveness_timeout_secs),
            ("capability_timeout_secs", self.capability_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "Must be greater than zero".to_string(),
                });
            }
        }

        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_probes".to_string(),
                reason: "Must allow at least 1 concurrent probe".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for MonitorConfig
#[derive(Debug, Default)]
pub struct MonitorConfigBuilder {
    enabled: Option<bool>,
    check_interval_secs: Option<u64>,
    liveness_timeout_secs: Option<u64>,
    capability_timeout_secs: Option<u64>,
    max_concurrent_probes: Option<usize>,
}

impl MonitorConfigBuilder {
    /// Enable/disable the background monitor
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the check interval
    pub fn check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = Some(secs);
        self
    }

    /// Set the liveness timeout
    pub fn liveness_timeout_secs(mut self, secs: u64) -> Self {
        self.liveness_timeout_secs = Some(secs);
        self
    }

    /// Set the capability probe deadline
    pub fn capability_timeout_secs(mut self, secs: u64) -> Self {
        self.capability_timeout_secs = Some(secs);
        self
    }

    /// Set probing concurrency
    pub fn max_concurrent_probes(mut self, max: usize) -> Self {
        self.max_concurrent_probes = Some(max);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<MonitorConfig, ConfigError> {
        let defaults = MonitorConfig::default();
        let config = MonitorConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            check_interval_secs: self
                .check_interval_secs
                .unwrap_or(defaults.check_interval_secs),
            liveness_timeout_secs: self
                .liveness_timeout_secs
                .unwrap_or(defaults.liveness_timeout_secs),
            capability_timeout_secs: self
                .capability_timeout_secs
                .unwrap_or(defaults.capability_timeout_secs),
            max_concurrent_probes: self
                .max_concurrent_probes
                .unwrap_or(defaults.max_concurrent_probes),
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Cluster Config
// ============================================================================

/// One `[[endpoints]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u32,

    #[serde(default = "default_health_port")]
    pub health_port: u32,
}

impl EndpointConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional `[probe]` section describing the capability probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub collection: String,
    pub vector_field: String,
    pub vector: Vec<f32>,

    #[serde(default = "default_metric_type")]
    pub metric_type: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// File form of the whole cluster description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub probe: Option<ProbeConfig>,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_health_port() -> u32 {
    DEFAULT_HEALTH_PORT
}

fn default_metric_type() -> String {
    DEFAULT_METRIC_TYPE.to_string()
}

impl ClusterConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), endpoints = config.endpoints.len(), "Loaded cluster config");
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables only
    ///
    /// `VECWATCH_ENDPOINTS` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto an existing configuration
    ///
    /// - `VECWATCH_ENDPOINTS`: `host:port[:health_port],...` replaces the endpoint list
    /// - `VECWATCH_CHECK_INTERVAL_SECS`: check interval
    /// - `VECWATCH_MONITOR_ENABLED`: `true`/`false`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(list) = std::env::var("VECWATCH_ENDPOINTS") {
            self.endpoints = parse_endpoint_list(&list)?;
        }

        if let Some(secs) = std::env::var("VECWATCH_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.monitor.check_interval_secs = secs;
        }

        if let Some(enabled) = std::env::var("VECWATCH_MONITOR_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
        {
            self.monitor.enabled = enabled;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::EmptyEndpoints);
        }

        if let Some(probe) = &self.probe {
            if probe.vector.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "probe.vector".to_string(),
                    reason: "Probe vector must not be empty".to_string(),
                });
            }
            if probe.collection.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "probe.collection".to_string(),
                    reason: "Collection name must not be empty".to_string(),
                });
            }
        }

        self.monitor.validate()
    }

    /// Build the endpoint registry, asking `handle_for` for each endpoint's work handle
    pub fn build_registry<F>(&self, mut handle_for: F) -> Result<EndpointRegistry, ConfigError>
    where
        F: FnMut(&EndpointConfig) -> Option<Arc<dyn WorkHandle>>,
    {
        let specs = self
            .endpoints
            .iter()
            .map(|ep| EndpointSpec {
                host: ep.host.clone(),
                port: ep.port,
                health_port: ep.health_port,
                handle: handle_for(ep),
            })
            .collect();

        EndpointRegistry::new(specs)
    }

    /// Capability probe description, if a `[probe]` section is present
    pub fn probe_spec(&self) -> Option<ProbeSpec> {
        self.probe.as_ref().map(|p| {
            ProbeSpec::new(&p.collection, &p.vector_field, p.vector.clone())
                .with_metric_type(&p.metric_type)
                .with_params(p.params.clone())
                .with_timeout(self.monitor.capability_timeout())
        })
    }
}

/// Parse `host:port[:health_port]` entries separated by commas
pub fn parse_endpoint_list(list: &str) -> Result<Vec<EndpointConfig>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_endpoint)
        .collect()
}

fn parse_endpoint(entry: &str) -> Result<EndpointConfig, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        address: entry.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = entry.split(':').collect();
    let (host, port, health_port) = match parts.as_slice() {
        [host, port] => (*host, *port, None),
        [host, port, health] => (*host, *port, Some(*health)),
        _ => return Err(invalid("Expected host:port[:health_port]")),
    };

    let port = port.parse::<u32>().map_err(|_| invalid("Port is not a number"))?;
    let health_port = match health_port {
        Some(p) => p
            .parse::<u32>()
            .map_err(|_| invalid("Health port is not a number"))?,
        None => DEFAULT_HEALTH_PORT,
    };

    Ok(EndpointConfig {
        host: host.to_string(),
        port,
        health_port,
    })
}
