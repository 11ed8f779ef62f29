//! Work handle seam between the monitor and the transport layer
//!
//! The monitor never talks to the query service itself. Each endpoint carries
//! an opaque [`WorkHandle`] that knows how to issue a similarity search against
//! that endpoint; the capability probe goes through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Request / Response
// ============================================================================

/// Read consistency requested for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Strong,
    Session,
    #[default]
    Bounded,
    Eventually,
}

impl ConsistencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Session => "session",
            Self::Bounded => "bounded",
            Self::Eventually => "eventually",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Similarity search request issued through a [`WorkHandle`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Target collection
    pub collection_name: String,

    /// Vector field searched
    pub vector_field: String,

    /// Query vectors; one result list is returned per vector
    pub vectors: Vec<Vec<f32>>,

    /// Number of hits per query vector
    pub top_k: usize,

    /// Decimal places kept in distances, -1 disables rounding
    pub round_decimal: i32,

    /// Distance metric (L2, IP, COSINE, ...)
    pub metric_type: String,

    /// Index-specific search parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Requested consistency
    pub consistency_level: ConsistencyLevel,
}

/// Status returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Status {
    pub code: i32,
    #[serde(default)]
    pub reason: String,
}

impl Status {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// A single ranked hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: i64,
    pub distance: f32,
}

/// Search response: one ranked list per query vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub status: Status,
    #[serde(default)]
    pub results: Vec<Vec<Hit>>,
}

impl SearchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Hits for the first query vector, empty if none were returned
    pub fn first_hits(&self) -> &[Hit] {
        self.results.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Errors surfaced by a work handle
#[derive(Error, Debug)]
pub enum HandleError {
    /// Request could not be delivered
    #[error("Transport error: {0}")]
    Transport(String),

    /// Service answered with a non-success status
    #[error("Service returned status {code}: {reason}")]
    Status { code: i32, reason: String },

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Capability to issue work against one endpoint
///
/// Implemented by the RPC/transport layer. Implementations must be cheap to
/// share; endpoints hold them behind an `Arc`.
#[async_trait]
pub trait WorkHandle: Send + Sync {
    /// Issue a similarity search
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, HandleError>;
}
