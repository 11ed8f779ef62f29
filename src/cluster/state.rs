//! Shared cluster state
//!
//! Written only by the monitor, read by everyone else. Each assignment swaps
//! an immutable value under a `parking_lot::RwLock` held for the swap alone,
//! so readers never wait on probing and never see a half-built list.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::endpoint::{Endpoint, EndpointRegistry};

// ============================================================================
// Cluster State
// ============================================================================

/// Available set and current master for one registry
#[derive(Debug)]
pub struct ClusterState {
    registry: Arc<EndpointRegistry>,
    available: RwLock<Arc<Vec<Endpoint>>>,
    master: RwLock<Endpoint>,
    cycles: AtomicU64,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
}

impl ClusterState {
    /// Start optimistic: everything available, first endpoint is master
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        let master = registry.default_endpoint().clone();
        let available = Arc::new(registry.all().to_vec());

        Self {
            registry,
            available: RwLock::new(available),
            master: RwLock::new(master),
            cycles: AtomicU64::new(0),
            last_cycle_at: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Current master
    pub fn master(&self) -> Endpoint {
        self.master.read().clone()
    }

    /// Endpoints that passed the last cycle, in registry order
    pub fn available(&self) -> Arc<Vec<Endpoint>> {
        Arc::clone(&self.available.read())
    }

    /// Whether the current master passed the last cycle
    pub fn is_master_available(&self) -> bool {
        let master = self.master();
        self.available().iter().any(|e| *e == master)
    }

    /// First available endpoint, or the registry default when none are
    pub fn elect_candidate(&self) -> Endpoint {
        self.available()
            .first()
            .cloned()
            .unwrap_or_else(|| self.registry.default_endpoint().clone())
    }

    /// Completed cycles since creation
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_at.read()
    }

    pub(crate) fn set_available(&self, available: Vec<Endpoint>) {
        *self.available.write() = Arc::new(available);
    }

    pub(crate) fn set_master(&self, master: Endpoint) {
        *self.master.write() = master;
    }

    pub(crate) fn record_cycle(&self, at: DateTime<Utc>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle_at.write() = Some(at);
    }

    /// Point-in-time copy suitable for reporting
    pub fn snapshot(&self) -> ClusterSnapshot {
        let master = self.master();
        let available = self.available();

        ClusterSnapshot {
            master: master.address(),
            master_available: available.iter().any(|e| *e == master),
            available: available.iter().map(Endpoint::address).collect(),
            all: self.registry.all().iter().map(Endpoint::address).collect(),
            cycles: self.cycles(),
            last_cycle_at: self.last_cycle_at(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Serializable view of the cluster state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub master: String,
    pub master_available: bool,
    pub available: Vec<String>,
    pub all: Vec<String>,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl ClusterSnapshot {
    /// Share of registered endpoints currently available, in percent
    pub fn availability(&self) -> f64 {
        if self.all.is_empty() {
            return 0.0;
        }
        (self.available.len() as f64 / self.all.len() as f64) * 100.0
    }
}
