//! Health probes
//!
//! A [`Probe`] answers one question about one endpoint: is it healthy? Two
//! kinds exist:
//! - **Liveness**: HTTP `GET /healthz` on the endpoint's health port
//! - **Capability**: a tiny similarity search issued through the endpoint's
//!   work handle
//!
//! Probes never return errors to the monitor. `check` collapses every failure
//! into `false` after logging it; `check_detailed` exposes the reason for
//! callers (and tests) that want it.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{MonitorConfig, DEFAULT_METRIC_TYPE};
use crate::metrics;

use super::endpoint::Endpoint;
use super::handle::{ConsistencyLevel, SearchRequest};

/// Liveness path on the health port
pub const HEALTHZ_PATH: &str = "/healthz";

/// Body a healthy endpoint answers with (compared case-insensitively)
pub const HEALTHY_BODY: &str = "OK";

/// Default liveness connect and read timeout
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capability probe deadline
pub const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(4);

/// Hits requested by the capability probe
pub const PROBE_TOP_K: usize = 5;

/// Disables distance rounding
pub const PROBE_ROUND_DECIMAL: i32 = -1;

const MAX_LOGGED_BODY: usize = 64;

// ============================================================================
// Probe Failure
// ============================================================================

/// Why a probe did not pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeFailure {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("unexpected body {0:?}")]
    Body(String),

    #[error("work handle error: {0}")]
    Handle(String),

    #[error("search rejected with code {code}: {reason}")]
    Rejected { code: i32, reason: String },

    #[error("search returned no hits")]
    EmptyResult,
}

/// Probe discriminant, used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Liveness,
    Capability,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Liveness => "liveness",
            Self::Capability => "capability",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Probe Spec
// ============================================================================

/// Fixed query used by the capability probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSpec {
    collection_name: String,
    vector_field: String,
    vector: Vec<f32>,
    metric_type: String,
    params: BTreeMap<String, String>,
    timeout: Duration,
}

impl ProbeSpec {
    pub fn new(
        collection_name: impl Into<String>,
        vector_field: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            collection_name: collection_name.into(),
            vector_field: vector_field.into(),
            vector,
            metric_type: DEFAULT_METRIC_TYPE.to_string(),
            params: BTreeMap::new(),
            timeout: CAPABILITY_TIMEOUT,
        }
    }

    pub fn with_metric_type(mut self, metric_type: impl Into<String>) -> Self {
        self.metric_type = metric_type.into();
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the single-vector search issued by the probe
    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            collection_name: self.collection_name.clone(),
            vector_field: self.vector_field.clone(),
            vectors: vec![self.vector.clone()],
            top_k: PROBE_TOP_K,
            round_decimal: PROBE_ROUND_DECIMAL,
            metric_type: self.metric_type.clone(),
            params: self.params.clone(),
            consistency_level: ConsistencyLevel::Eventually,
        }
    }
}

// ============================================================================
// Liveness Probe
// ============================================================================

/// HTTP liveness check against `/healthz` on the health port
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    client: Client,
    timeout: Duration,
}

impl LivenessProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        // Connect and each read are bounded separately; no overall deadline
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    async fn check_detailed(&self, endpoint: &Endpoint) -> Result<(), ProbeFailure> {
        let response = self
            .client
            .get(endpoint.health_url())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProbeFailure::Status(status.as_u16()));
        }

        // Raw bytes, so no charset decoding or BOM stripping happens first
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        // Exact match ignoring ASCII case only; surrounding whitespace fails
        if body.eq_ignore_ascii_case(HEALTHY_BODY.as_bytes()) {
            Ok(())
        } else {
            Err(ProbeFailure::Body(
                String::from_utf8_lossy(&body)
                    .chars()
                    .take(MAX_LOGGED_BODY)
                    .collect(),
            ))
        }
    }

    fn classify(&self, error: reqwest::Error) -> ProbeFailure {
        if error.is_timeout() {
            ProbeFailure::Timeout(self.timeout)
        } else {
            ProbeFailure::Transport(error.to_string())
        }
    }
}

// ============================================================================
// Capability Probe
// ============================================================================

/// Similarity search through the endpoint's work handle
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    spec: ProbeSpec,
}

impl CapabilityProbe {
    pub fn new(spec: ProbeSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    async fn check_detailed(&self, endpoint: &Endpoint) -> Result<(), ProbeFailure> {
        let request = self.spec.to_request();
        let search = endpoint.handle().search(&request);

        let response = match tokio::time::timeout(self.spec.timeout, search).await {
            Err(_) => return Err(ProbeFailure::Timeout(self.spec.timeout)),
            Ok(Err(e)) => return Err(ProbeFailure::Handle(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Err(ProbeFailure::Rejected {
                code: response.status.code,
                reason: response.status.reason,
            });
        }

        if response.first_hits().is_empty() {
            return Err(ProbeFailure::EmptyResult);
        }

        Ok(())
    }
}

// ============================================================================
// Probe
// ============================================================================

/// A single health probe
#[derive(Debug, Clone)]
pub enum Probe {
    Liveness(LivenessProbe),
    Capability(CapabilityProbe),
}

impl Probe {
    pub fn kind(&self) -> ProbeKind {
        match self {
            Self::Liveness(_) => ProbeKind::Liveness,
            Self::Capability(_) => ProbeKind::Capability,
        }
    }

    /// Run the probe and report why it failed, if it did
    pub async fn check_detailed(&self, endpoint: &Endpoint) -> Result<(), ProbeFailure> {
        match self {
            Self::Liveness(p) => p.check_detailed(endpoint).await,
            Self::Capability(p) => p.check_detailed(endpoint).await,
        }
    }

    /// Run the probe; failures are logged and reported as `false`
    pub async fn check(&self, endpoint: &Endpoint) -> bool {
        match self.check_detailed(endpoint).await {
            Ok(()) => {
                debug!(addr = %endpoint, probe = %self.kind(), "Probe passed");
                true
            }
            Err(failure) => {
                debug!(addr = %endpoint, probe = %self.kind(), reason = %failure, "Probe failed");
                metrics::record_probe_failure(&endpoint.address(), self.kind().as_str());
                false
            }
        }
    }
}

// ============================================================================
// Probe Set
// ============================================================================

/// Ordered list of probes combined with short-circuit AND
#[derive(Debug, Clone, Default)]
pub struct ProbeSet {
    probes: Vec<Probe>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a probe; it runs after the ones already present
    pub fn with(mut self, probe: Probe) -> Self {
        self.probes.push(probe);
        self
    }

    /// Liveness always, capability when a probe spec is configured
    pub fn from_config(
        config: &MonitorConfig,
        spec: Option<ProbeSpec>,
    ) -> crate::error::Result<Self> {
        let mut set = Self::new().with(Probe::Liveness(LivenessProbe::new(
            config.liveness_timeout(),
        )?));

        if let Some(spec) = spec {
            let spec = spec.with_timeout(config.capability_timeout());
            set = set.with(Probe::Capability(CapabilityProbe::new(spec)));
        }

        Ok(set)
    }

    pub fn kinds(&self) -> Vec<ProbeKind> {
        self.probes.iter().map(Probe::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// True iff every probe passes; stops at the first failure
    pub async fn evaluate(&self, endpoint: &Endpoint) -> bool {
        for probe in &self.probes {
            if !probe.check(endpoint).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::endpoint::{EndpointRegistry, EndpointSpec};
    use crate::cluster::handle::{HandleError, Hit, SearchResponse, Status, WorkHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replies with a fixed response and records every request
    struct FixedHandle {
        response: Result<SearchResponse, String>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        last_request: Mutex<Option<SearchRequest>>,
    }

    impl FixedHandle {
        fn new(response: Result<SearchResponse, String>) -> Self {
            Self {
                response,
                delay: None,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl WorkHandle for FixedHandle {
        async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, HandleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.clone().map_err(HandleError::Transport)
        }
    }

    fn hits(n: usize) -> SearchResponse {
        SearchResponse {
            status: Status::success(),
            results: vec![(0..n)
                .map(|i| Hit {
                    id: i as i64,
                    distance: i as f32,
                })
                .collect()],
        }
    }

    fn endpoint_with(handle: Arc<FixedHandle>) -> Endpoint {
        let registry = EndpointRegistry::new(vec![
            EndpointSpec::new("127.0.0.1", 19530, 1).with_handle(handle),
        ])
        .unwrap();
        registry.default_endpoint().clone()
    }

    fn capability() -> Probe {
        Probe::Capability(CapabilityProbe::new(ProbeSpec::new(
            "probe",
            "embedding",
            vec![0.5, 0.5],
        )))
    }

    #[test]
    fn test_probe_request_shape() {
        let request = ProbeSpec::new("probe", "embedding", vec![1.0, 2.0])
            .with_metric_type("IP")
            .to_request();

        assert_eq!(request.vectors, vec![vec![1.0, 2.0]]);
        assert_eq!(request.top_k, 5);
        assert_eq!(request.round_decimal, -1);
        assert_eq!(request.metric_type, "IP");
        assert_eq!(request.consistency_level, ConsistencyLevel::Eventually);
    }

    #[tokio::test]
    async fn test_capability_passes_with_hits() {
        let handle = Arc::new(FixedHandle::new(Ok(hits(3))));
        let endpoint = endpoint_with(handle.clone());

        assert!(capability().check(&endpoint).await);
        let request = handle.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.collection_name, "probe");
    }

    #[tokio::test]
    async fn test_capability_fails_on_empty_result() {
        let endpoint = endpoint_with(Arc::new(FixedHandle::new(Ok(hits(0)))));
        assert_eq!(
            capability().check_detailed(&endpoint).await,
            Err(ProbeFailure::EmptyResult)
        );

        // No result lists at all
        let endpoint = endpoint_with(Arc::new(FixedHandle::new(Ok(SearchResponse::default()))));
        assert!(!capability().check(&endpoint).await);
    }

    #[tokio::test]
    async fn test_capability_fails_on_error_status() {
        let mut response = hits(5);
        response.status = Status {
            code: 1,
            reason: "collection not loaded".to_string(),
        };
        let endpoint = endpoint_with(Arc::new(FixedHandle::new(Ok(response))));

        assert!(matches!(
            capability().check_detailed(&endpoint).await,
            Err(ProbeFailure::Rejected { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_capability_fails_on_handle_error() {
        let endpoint = endpoint_with(Arc::new(FixedHandle::new(Err("refused".to_string()))));
        assert!(matches!(
            capability().check_detailed(&endpoint).await,
            Err(ProbeFailure::Handle(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_deadline() {
        let mut handle = FixedHandle::new(Ok(hits(1)));
        handle.delay = Some(Duration::from_secs(30));
        let endpoint = endpoint_with(Arc::new(handle));

        let probe = Probe::Capability(CapabilityProbe::new(
            ProbeSpec::new("probe", "embedding", vec![0.0]).with_timeout(Duration::from_secs(4)),
        ));
        assert_eq!(
            probe.check_detailed(&endpoint).await,
            Err(ProbeFailure::Timeout(Duration::from_secs(4)))
        );
    }

    #[tokio::test]
    async fn test_probe_set_short_circuits() {
        let handle = Arc::new(FixedHandle::new(Ok(hits(1))));
        let endpoint = endpoint_with(handle.clone());

        // Liveness against port 1 on localhost fails fast, capability must not run
        let set = ProbeSet::new()
            .with(Probe::Liveness(LivenessProbe::new(Duration::from_secs(1)).unwrap()))
            .with(capability());

        assert!(!set.evaluate(&endpoint).await);
        assert_eq!(handle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_probe_set_passes() {
        let endpoint = endpoint_with(Arc::new(FixedHandle::new(Ok(hits(1)))));
        assert!(ProbeSet::new().evaluate(&endpoint).await);
    }

    #[test]
    fn test_from_config_kinds() {
        let config = MonitorConfig::default();
        let set = ProbeSet::from_config(&config, None).unwrap();
        assert_eq!(set.kinds(), vec![ProbeKind::Liveness]);

        let spec = ProbeSpec::new("c", "v", vec![0.1]);
        let set = ProbeSet::from_config(&config, Some(spec)).unwrap();
        assert_eq!(set.kinds(), vec![ProbeKind::Liveness, ProbeKind::Capability]);
    }
}
