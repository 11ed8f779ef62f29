//! Common test utilities

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use vecwatch::cluster::{
    CapabilityProbe, ClusterEvent, ClusterMonitor, ClusterState, EndpointRegistry, EndpointSpec,
    HandleError, Hit, Probe, ProbeSet, ProbeSpec, SearchRequest, SearchResponse, Status,
    WorkHandle,
};
use vecwatch::config::MonitorConfig;

/// Work handle whose health can be flipped between cycles
pub struct ScriptedHandle {
    healthy: AtomicBool,
    panics: AtomicBool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedHandle {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            panics: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_panics(&self, panics: bool) {
        self.panics.store(panics, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkHandle for ScriptedHandle {
    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, HandleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics.load(Ordering::SeqCst) {
            panic!("scripted handle panic");
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(HandleError::Transport("connection refused".to_string()));
        }
        Ok(SearchResponse {
            status: Status::success(),
            results: vec![vec![Hit {
                id: 42,
                distance: 0.0,
            }]],
        })
    }
}

/// Registry of `host:19530` endpoints, one scripted handle each
#[allow(dead_code)]
pub fn scripted_registry(hosts: &[&str]) -> (EndpointRegistry, Vec<Arc<ScriptedHandle>>) {
    let handles: Vec<Arc<ScriptedHandle>> = hosts.iter().map(|_| ScriptedHandle::healthy()).collect();
    let specs = hosts
        .iter()
        .zip(&handles)
        .map(|(host, handle)| EndpointSpec::new(*host, 19530, 9091).with_handle(handle.clone()))
        .collect();

    (EndpointRegistry::new(specs).unwrap(), handles)
}

/// Probe set with only the capability probe
#[allow(dead_code)]
pub fn capability_probes() -> ProbeSet {
    ProbeSet::new().with(Probe::Capability(CapabilityProbe::new(ProbeSpec::new(
        "health_probe",
        "embedding",
        vec![0.1, 0.2, 0.3],
    ))))
}

/// Monitor over scripted endpoints using the capability probe
#[allow(dead_code)]
pub fn scripted_monitor(
    hosts: &[&str],
) -> (
    ClusterMonitor,
    Vec<Arc<ScriptedHandle>>,
    broadcast::Receiver<ClusterEvent>,
) {
    let (registry, handles) = scripted_registry(hosts);
    let state = Arc::new(ClusterState::new(Arc::new(registry)));
    let (events, rx) = broadcast::channel(64);
    let monitor = ClusterMonitor::new(state, capability_probes(), MonitorConfig::default(), events);
    (monitor, handles, rx)
}

/// Hosts of a list of endpoints
#[allow(dead_code)]
pub fn hosts(endpoints: &[vecwatch::Endpoint]) -> Vec<String> {
    endpoints.iter().map(|e| e.host().to_string()).collect()
}
