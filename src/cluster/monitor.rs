//! Background monitor loop
//!
//! One cycle probes every registered endpoint, swaps in the new available
//! set, then re-elects the master if the current one dropped out. Cycles run
//! on a fixed ticker until the shutdown channel fires; only this task ever
//! writes to [`ClusterState`].

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::metrics;

use super::endpoint::Endpoint;
use super::event::ClusterEvent;
use super::probe::ProbeSet;
use super::state::ClusterState;

// ============================================================================
// Errors & Reports
// ============================================================================

/// A cycle that could not be committed; the previous state is kept
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("Endpoint {address} is not part of the registry")]
    UnknownEndpoint { address: String },

    #[error("Cycle panicked: {0}")]
    Panicked(String),
}

/// Outcome of one committed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Endpoints that passed, in registry order
    pub available: Arc<Vec<Endpoint>>,

    /// Master after the elect step
    pub master: Endpoint,

    /// Whether the elect step replaced the master
    pub master_changed: bool,

    /// Time spent probing and committing
    pub duration: Duration,
}

impl CycleReport {
    pub fn available_addresses(&self) -> Vec<String> {
        self.available.iter().map(Endpoint::address).collect()
    }
}

// ============================================================================
// Cluster Monitor
// ============================================================================

/// Probes the registry and maintains the cluster state
pub struct ClusterMonitor {
    state: Arc<ClusterState>,
    probes: ProbeSet,
    config: MonitorConfig,
    events: broadcast::Sender<ClusterEvent>,
}

impl ClusterMonitor {
    pub fn new(
        state: Arc<ClusterState>,
        probes: ProbeSet,
        config: MonitorConfig,
        events: broadcast::Sender<ClusterEvent>,
    ) -> Self {
        Self {
            state,
            probes,
            config,
            events,
        }
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run one probe/commit/elect cycle
    ///
    /// Must not run concurrently with another cycle on the same state; the
    /// spawned loop guarantees that.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let available = self.probe_all().await;

        let result = self.commit(available, started);
        if let Err(e) = &result {
            self.fail_cycle(e);
        }
        result
    }

    /// Probe every endpoint, keeping those that pass in registry order
    async fn probe_all(&self) -> Vec<Endpoint> {
        let endpoints = self.state.registry().all();
        let concurrency = self.config.max_concurrent_probes.max(1);

        // Owned endpoints keep the stream's future free of higher-ranked borrows
        let outcomes: Vec<bool> = stream::iter(endpoints.to_vec())
            .map(|ep| async move { self.evaluate(&ep).await })
            .buffered(concurrency)
            .collect()
            .await;

        endpoints
            .iter()
            .zip(outcomes)
            .filter_map(|(ep, healthy)| healthy.then(|| ep.clone()))
            .collect()
    }

    /// Evaluate one endpoint; a panic marks only this endpoint unavailable
    async fn evaluate(&self, endpoint: &Endpoint) -> bool {
        match AssertUnwindSafe(self.probes.evaluate(endpoint))
            .catch_unwind()
            .await
        {
            Ok(healthy) => healthy,
            Err(panic) => {
                warn!(
                    addr = %endpoint,
                    panic = %panic_message(panic.as_ref()),
                    "Probe panicked, marking endpoint unavailable"
                );
                metrics::record_probe_failure(&endpoint.address(), "panic");
                false
            }
        }
    }

    /// Swap in the new available set, then re-elect if needed
    pub(crate) fn commit(
        &self,
        available: Vec<Endpoint>,
        started: Instant,
    ) -> Result<CycleReport, CycleError> {
        let registry = self.state.registry();

        // Validate everything before the first write
        if let Some(stranger) = available.iter().find(|ep| !registry.contains(ep)) {
            return Err(CycleError::UnknownEndpoint {
                address: stranger.address(),
            });
        }

        let previous = self.state.available();
        self.state.set_available(available);
        let current = self.state.available();
        self.announce_transitions(&previous, &current);

        let previous_master = self.state.master();
        let mut master_changed = false;
        if !self.state.is_master_available() {
            let candidate = self.state.elect_candidate();
            if candidate != previous_master {
                info!(from = %previous_master, to = %candidate, "Master changed");
                metrics::record_master_election(&candidate.address());
                let event = ClusterEvent::MasterChanged {
                    from: previous_master.address(),
                    to: candidate.address(),
                };
                self.state.set_master(candidate);
                self.announce(event);
                master_changed = true;
            }
        }

        self.state.record_cycle(chrono::Utc::now());
        metrics::update_endpoint_gauges(registry.len(), current.len());

        let duration = started.elapsed();
        metrics::record_cycle(duration.as_secs_f64());
        debug!(
            available = current.len(),
            total = registry.len(),
            master = %self.state.master(),
            elapsed_ms = duration.as_millis() as u64,
            "Cluster cycle committed"
        );

        Ok(CycleReport {
            available: current,
            master: self.state.master(),
            master_changed,
            duration,
        })
    }

    fn announce_transitions(&self, previous: &[Endpoint], current: &[Endpoint]) {
        for ep in previous.iter().filter(|ep| !current.contains(ep)) {
            warn!(addr = %ep, "Endpoint became unavailable");
            self.announce(ClusterEvent::EndpointDown {
                address: ep.address(),
            });
        }

        for ep in current.iter().filter(|ep| !previous.contains(ep)) {
            info!(addr = %ep, "Endpoint is available again");
            self.announce(ClusterEvent::EndpointUp {
                address: ep.address(),
            });
        }
    }

    fn fail_cycle(&self, e: &CycleError) {
        error!(error = %e, "Cluster cycle failed, keeping previous state");
        metrics::record_cycle_failure();
        self.announce(ClusterEvent::CycleFailed {
            reason: e.to_string(),
        });
    }

    fn announce(&self, event: ClusterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Spawn the loop on the current tokio runtime
    ///
    /// The first cycle starts immediately. Dropping the returned handle
    /// without calling `shutdown` also stops the loop at its next idle wait.
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.config.check_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                endpoints = self.state.registry().len(),
                probes = self.probes.len(),
                interval_secs = period.as_secs(),
                "Cluster monitor started"
            );

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        info!("Cluster monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
                        if let Err(panic) = cycle {
                            self.fail_cycle(&CycleError::Panicked(panic_message(panic.as_ref())));
                        }
                    }
                }
            }
        });

        MonitorHandle { handle, shutdown }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Monitor Handle
// ============================================================================

/// Handle to a running monitor loop
#[derive(Debug)]
pub struct MonitorHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Wait for the loop to exit
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Signal shutdown and wait for the loop to exit
    ///
    /// A cycle already probing runs to completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::endpoint::{EndpointRegistry, EndpointSpec};
    use crate::cluster::handle::{
        HandleError, Hit, SearchRequest, SearchResponse, Status, WorkHandle,
    };
    use crate::cluster::probe::{CapabilityProbe, Probe, ProbeSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Switch {
        healthy: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkHandle for Switch {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, HandleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(SearchResponse {
                    status: Status::success(),
                    results: vec![vec![Hit { id: 1, distance: 0.0 }]],
                })
            } else {
                Err(HandleError::Transport("down".to_string()))
            }
        }
    }

    fn setup(hosts: &[&str]) -> (ClusterMonitor, Vec<Arc<Switch>>, broadcast::Receiver<ClusterEvent>) {
        let switches: Vec<Arc<Switch>> = hosts
            .iter()
            .map(|_| {
                Arc::new(Switch {
                    healthy: AtomicBool::new(true),
                    calls: AtomicUsize::new(0),
                })
            })
            .collect();

        let specs = hosts
            .iter()
            .zip(&switches)
            .map(|(h, s)| EndpointSpec::new(*h, 19530, 9091).with_handle(s.clone()))
            .collect();
        let registry = Arc::new(EndpointRegistry::new(specs).unwrap());

        let probes = ProbeSet::new().with(Probe::Capability(CapabilityProbe::new(
            ProbeSpec::new("probe", "v", vec![0.0]),
        )));
        let (events, rx) = broadcast::channel(16);
        let monitor = ClusterMonitor::new(
            Arc::new(ClusterState::new(registry)),
            probes,
            MonitorConfig::default(),
            events,
        );
        (monitor, switches, rx)
    }

    #[tokio::test]
    async fn test_cycle_reports_master_change() {
        let (monitor, switches, mut rx) = setup(&["a", "b"]);
        switches[0].healthy.store(false, Ordering::SeqCst);

        let report = monitor.run_cycle().await.unwrap();
        assert!(report.master_changed);
        assert_eq!(report.master.host(), "b");
        assert_eq!(report.available_addresses(), vec!["b:19530"]);

        assert_eq!(
            rx.recv().await.unwrap(),
            ClusterEvent::EndpointDown {
                address: "a:19530".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ClusterEvent::MasterChanged {
                from: "a:19530".to_string(),
                to: "b:19530".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_endpoint() {
        let (monitor, _switches, mut rx) = setup(&["a", "b"]);
        let (other, _, _) = setup(&["z"]);
        let stranger = other.state().registry().default_endpoint().clone();

        let result = monitor.commit(vec![stranger], Instant::now());
        assert_eq!(
            result.unwrap_err(),
            CycleError::UnknownEndpoint {
                address: "z:19530".to_string()
            }
        );

        // Nothing was written
        assert_eq!(monitor.state().available().len(), 2);
        assert_eq!(monitor.state().master().host(), "a");
        assert_eq!(monitor.state().cycles(), 0);

        // Failure is only announced by run_cycle
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequential_probing_with_concurrency_one() {
        let (mut monitor, switches, _rx) = setup(&["a", "b", "c"]);
        monitor.config.max_concurrent_probes = 1;
        switches[1].healthy.store(false, Ordering::SeqCst);

        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.available_addresses(), vec!["a:19530", "c:19530"]);
        assert!(switches.iter().all(|s| s.calls.load(Ordering::SeqCst) == 1));
    }

    #[tokio::test]
    async fn test_spawned_loop_shuts_down() {
        let (monitor, _switches, _rx) = setup(&["a"]);
        let monitor = Arc::new(monitor);
        let handle = Arc::clone(&monitor).spawn();
        assert!(handle.is_running());

        // First tick is immediate; wait for it to commit
        for _ in 0..100 {
            if monitor.state().cycles() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(monitor.state().cycles() >= 1);

        handle.shutdown().await;
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_cycle_future_is_send() {
        let (monitor, _switches, _rx) = setup(&["a", "b"]);
        let monitor = Arc::new(monitor);

        let cycle = monitor.run_cycle();
        assert_send(&cycle);
        assert!(cycle.await.is_ok());

        // Spawning needs the whole loop future to be Send
        let handle = Arc::clone(&monitor).spawn();
        handle.shutdown().await;
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");

        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
