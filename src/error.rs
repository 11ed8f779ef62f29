//! Unified error handling for the vecwatch crate
//!
//! Setup-time failures only. Configuration problems come from
//! [`ConfigError`]; building the HTTP clients behind the probes can fail with
//! a `reqwest` error.
//!
//! Probe failures are not errors. They surface as `false` plus a log line, and
//! cycle failures are reported by [`crate::cluster::ClusterMonitor::run_cycle`]
//! as a `CycleError` without passing through here.

use thiserror::Error;

pub use crate::config::ConfigError;

/// Unified error type for the vecwatch crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
