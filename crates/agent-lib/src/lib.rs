//! Agent library for per-container telemetry and memory governance
//!
//! This crate provides the core functionality for:
//! - Tracking monitored containers in a synchronized registry
//! - Per-container collection of CPU, memory and network counters
//! - Rate computation and best-effort delivery to the remote monitor
//! - Enforcing a host-wide soft memory ceiling
//! - Health checks and observability

pub mod collector;
pub mod error;
pub mod governor;
pub mod health;
pub mod models;
pub mod observability;
pub mod proto;
pub mod rate;
pub mod registry;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use error::{AdmitError, CollectError, RuntimeError, StoreError, TransportError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use registry::{Admission, AppRegistry, AppRegistryBuilder};
