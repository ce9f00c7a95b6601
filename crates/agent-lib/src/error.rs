//! Error types shared across the agent library

use std::time::Duration;
use thiserror::Error;

/// Failure to take a snapshot of an app's counters.
///
/// Always recovered locally: the tick is skipped and the previous snapshot
/// stays the baseline.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("runtime returned no stats for container {0}")]
    StatsUnavailable(String),

    #[error("runtime stats call failed: {0}")]
    Runtime(String),

    #[error("failed to open probe session for container {container_id}: {message}")]
    ProbeSession {
        container_id: String,
        message: String,
    },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Failure to deliver a batch to the remote monitor
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transfer endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },

    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("update call failed: {0}")]
    Call(String),

    #[error("update call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no transfer endpoints configured")]
    NoEndpoints,
}

/// Failure to write to the coordination store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store write failed: {0}")]
    Write(String),
}

/// Reason an app was not admitted into the registry
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("initial metric probe failed: {0}")]
    Probe(#[from] CollectError),

    #[error("no transport for app: {0}")]
    Transport(#[from] TransportError),
}

/// Failure of a runtime control call such as stopping a container
#[derive(Debug, Error)]
#[error("runtime call failed for container {container_id}: {message}")]
pub struct RuntimeError {
    pub container_id: String,
    pub message: String,
}

impl RuntimeError {
    pub fn new(container_id: impl Into<String>, message: impl ToString) -> Self {
        Self {
            container_id: container_id.into(),
            message: message.to_string(),
        }
    }
}
