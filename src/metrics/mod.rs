//! Prometheus metrics for the cluster monitor
//!
//! This module tracks:
//! - Probe failures per endpoint and probe kind
//! - Master elections and failed cycles
//! - Registered and available endpoint counts
//! - Probing cycle duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then (or if initialization fails) every recording function is a no-op,
//! so library users who do not care about Prometheus pay nothing.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all monitor metrics
struct MonitorMetrics {
    registered_endpoints: Gauge,
    available_endpoints: Gauge,
    probe_failures: CounterVec,
    master_elections: CounterVec,
    cycles: Counter,
    cycle_failures: Counter,
    cycle_duration: Histogram,
}

static MONITOR_METRICS: OnceLock<MonitorMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registers into the default Prometheus registry. Calling it more than once
/// is harmless.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = vecwatch::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = MonitorMetrics {
        registered_endpoints: register_gauge!(
            "vecwatch_registered_endpoints",
            "Number of endpoints in the registry"
        )?,
        available_endpoints: register_gauge!(
            "vecwatch_available_endpoints",
            "Number of endpoints that passed the last probing cycle"
        )?,
        probe_failures: register_counter_vec!(
            "vecwatch_probe_failures_total",
            "Total probe failures by endpoint and probe kind",
            &["endpoint", "probe"]
        )?,
        master_elections: register_counter_vec!(
            "vecwatch_master_elections_total",
            "Total master changes by newly elected endpoint",
            &["endpoint"]
        )?,
        cycles: register_counter!(
            "vecwatch_cycles_total",
            "Total completed probing cycles"
        )?,
        cycle_failures: register_counter!(
            "vecwatch_cycle_failures_total",
            "Total probing cycles aborted without committing"
        )?,
        cycle_duration: register_histogram!(
            "vecwatch_cycle_duration_seconds",
            "Time spent probing all endpoints in seconds",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
    };

    MONITOR_METRICS
        .set(metrics)
        .map_err(|_| "Monitor metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    MONITOR_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Update endpoint count gauges after a commit
pub fn update_endpoint_gauges(registered: usize, available: usize) {
    if let Some(m) = MONITOR_METRICS.get() {
        m.registered_endpoints.set(registered as f64);
        m.available_endpoints.set(available as f64);
    }
}

/// Record a failed probe
pub fn record_probe_failure(endpoint: &str, probe: &str) {
    if let Some(m) = MONITOR_METRICS.get() {
        m.probe_failures.with_label_values(&[endpoint, probe]).inc();
    }
}

/// Record a master change
pub fn record_master_election(endpoint: &str) {
    if let Some(m) = MONITOR_METRICS.get() {
        m.master_elections.with_label_values(&[endpoint]).inc();
    }
}

/// Record a completed cycle and its duration
pub fn record_cycle(duration_secs: f64) {
    let Some(m) = MONITOR_METRICS.get() else {
        return;
    };

    m.cycles.inc();
    m.cycle_duration.observe(duration_secs);
}

/// Record an aborted cycle
pub fn record_cycle_failure() {
    if let Some(m) = MONITOR_METRICS.get() {
        m.cycle_failures.inc();
    }
}
