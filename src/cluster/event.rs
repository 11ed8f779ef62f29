//! Cluster change notifications

use serde::Serialize;
use std::fmt;

/// Capacity of the broadcast channel carrying [`ClusterEvent`]s
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something observable changed after a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    /// A new master was elected
    MasterChanged { from: String, to: String },

    /// Endpoint left the available set
    EndpointDown { address: String },

    /// Endpoint rejoined the available set
    EndpointUp { address: String },

    /// Cycle aborted, previous state retained
    CycleFailed { reason: String },
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MasterChanged { from, to } => write!(f, "master changed: {} -> {}", from, to),
            Self::EndpointDown { address } => write!(f, "endpoint down: {}", address),
            Self::EndpointUp { address } => write!(f, "endpoint up: {}", address),
            Self::CycleFailed { reason } => write!(f, "cycle failed: {}", reason),
        }
    }
}
