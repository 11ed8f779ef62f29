//! Cluster health monitoring and master election
//!
//! # Overview
//!
//! A [`Cluster`] owns a fixed [`EndpointRegistry`], a [`ClusterState`] and
//! (optionally) a background [`ClusterMonitor`]. The monitor periodically runs
//! a [`ProbeSet`] against every endpoint, replaces the available set, and keeps
//! a single master endpoint that clients use by default.
//!
//! # Example
//!
//! ```ignore
//! use vecwatch::cluster::{Cluster, ProbeSet};
//! use vecwatch::config::{ClusterConfig, MonitorConfig};
//!
//! let config = ClusterConfig::from_file("vecwatch.toml".as_ref())?;
//! let registry = config.build_registry(|ep| Some(make_handle(ep)))?;
//! let probes = ProbeSet::from_config(&config.monitor, config.probe_spec())?;
//!
//! let mut cluster = Cluster::new(registry, probes, config.monitor.clone())?;
//! cluster.start();
//! let master = cluster.master();
//! cluster.close().await;
//! ```

pub mod endpoint;
pub mod event;
pub mod handle;
pub mod monitor;
pub mod probe;
pub mod rest;
pub mod state;

pub use endpoint::{Endpoint, EndpointRegistry, EndpointSpec};
pub use event::{ClusterEvent, EVENT_CHANNEL_CAPACITY};
pub use handle::{
    ConsistencyLevel, HandleError, Hit, SearchRequest, SearchResponse, Status, WorkHandle,
};
pub use monitor::{ClusterMonitor, CycleError, CycleReport, MonitorHandle};
pub use probe::{
    CapabilityProbe, LivenessProbe, Probe, ProbeFailure, ProbeKind, ProbeSet, ProbeSpec,
};
pub use rest::RestWorkHandle;
pub use state::{ClusterSnapshot, ClusterState};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::MonitorConfig;
use crate::error::Result;

// ============================================================================
// Cluster
// ============================================================================

/// Owner of the cluster state and its monitor
///
/// Readers (`master`, `available`, ...) never block on probing. The monitor
/// is started explicitly with [`Cluster::start`] and stopped with
/// [`Cluster::close`]; dropping the cluster also stops it.
pub struct Cluster {
    state: Arc<ClusterState>,
    monitor: Arc<ClusterMonitor>,
    events: broadcast::Sender<ClusterEvent>,
    running: Option<MonitorHandle>,
}

impl Cluster {
    /// Build the cluster; the monitor is not started yet
    pub fn new(registry: EndpointRegistry, probes: ProbeSet, config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(ClusterState::new(Arc::new(registry)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Arc::new(ClusterMonitor::new(
            Arc::clone(&state),
            probes,
            config,
            events.clone(),
        ));

        Ok(Self {
            state,
            monitor,
            events,
            running: None,
        })
    }

    /// Build and immediately start the monitor (when enabled)
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        registry: EndpointRegistry,
        probes: ProbeSet,
        config: MonitorConfig,
    ) -> Result<Self> {
        let mut cluster = Self::new(registry, probes, config)?;
        cluster.start();
        Ok(cluster)
    }

    /// Start the background monitor
    ///
    /// No-op when monitoring is disabled or already running. With monitoring
    /// disabled the state stays at its optimistic initial value.
    pub fn start(&mut self) {
        if !self.monitor.config().enabled {
            tracing::info!("Cluster monitoring disabled, using static endpoint list");
            return;
        }
        if self.is_monitoring() {
            return;
        }
        self.running = Some(Arc::clone(&self.monitor).spawn());
    }

    /// Stop the monitor and wait for it to exit
    pub async fn close(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.shutdown().await;
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.as_ref().is_some_and(MonitorHandle::is_running)
    }

    pub fn master(&self) -> Endpoint {
        self.state.master()
    }

    pub fn available(&self) -> Arc<Vec<Endpoint>> {
        self.state.available()
    }

    pub fn is_master_available(&self) -> bool {
        self.state.is_master_available()
    }

    pub fn registry(&self) -> &EndpointRegistry {
        self.state.registry()
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.state.snapshot()
    }

    /// Receive cluster change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("master", &self.state.master().address())
            .field("available", &self.state.available().len())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopHandle;

    #[async_trait]
    impl WorkHandle for NoopHandle {
        async fn search(&self, _request: &SearchRequest) -> std::result::Result<SearchResponse, HandleError> {
            Ok(SearchResponse::default())
        }
    }

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(vec![
            EndpointSpec::new("a", 19530, 9091).with_handle(Arc::new(NoopHandle)),
            EndpointSpec::new("b", 19530, 9091).with_handle(Arc::new(NoopHandle)),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_monitor_keeps_static_state() {
        let config = MonitorConfig::builder().enabled(false).build().unwrap();
        let mut cluster = Cluster::connect(registry(), ProbeSet::new(), config).unwrap();

        assert!(!cluster.is_monitoring());
        assert_eq!(cluster.master().host(), "a");
        assert_eq!(cluster.available().len(), 2);
        assert!(cluster.is_master_available());

        cluster.close().await;
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let mut cluster = Cluster::new(registry(), ProbeSet::new(), MonitorConfig::default()).unwrap();
        assert!(!cluster.is_monitoring());

        cluster.start();
        assert!(cluster.is_monitoring());

        // Starting twice keeps the same loop
        cluster.start();
        assert!(cluster.is_monitoring());

        cluster.close().await;
        assert!(!cluster.is_monitoring());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MonitorConfig {
            check_interval_secs: 0,
            ..MonitorConfig::default()
        };
        assert!(Cluster::new(registry(), ProbeSet::new(), config).is_err());
    }
}
