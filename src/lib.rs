//! vecwatch - cluster health monitoring for vector database clients
//!
//! Tracks a fixed set of query-service endpoints, probes them periodically and
//! keeps a single master endpoint that client operations use by default.
//!
//! # Architecture
//!
//! - [`cluster`] - Endpoint registry, probes, cluster state and the monitor loop
//! - [`config`] - Monitor settings and the TOML/env cluster description
//! - [`error`] - Unified error type
//! - [`metrics`] - Optional Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vecwatch::cluster::{Cluster, ProbeSet, RestWorkHandle, WorkHandle};
//! use vecwatch::config::ClusterConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClusterConfig::from_env()?;
//!     let registry = config.build_registry(|ep| {
//!         let url = format!("http://{}", ep.address());
//!         RestWorkHandle::new(url, Duration::from_secs(4))
//!             .ok()
//!             .map(|h| Arc::new(h) as Arc<dyn WorkHandle>)
//!     })?;
//!     let probes = ProbeSet::from_config(&config.monitor, config.probe_spec())?;
//!
//!     let mut cluster = Cluster::connect(registry, probes, config.monitor.clone())?;
//!     println!("master: {}", cluster.master());
//!     cluster.close().await;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{
        Cluster, ClusterEvent, ClusterSnapshot, Endpoint, EndpointRegistry, EndpointSpec,
        ProbeSet, ProbeSpec, WorkHandle,
    };
    pub use crate::config::{ClusterConfig, ConfigError, MonitorConfig};
    pub use crate::error::{Error, Result};
}

pub use cluster::{Cluster, Endpoint, EndpointRegistry};
