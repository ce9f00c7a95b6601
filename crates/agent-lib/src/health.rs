//! Health tracking for the telemetry agent
//!
//! Three components report here:
//! - `registry`: container discovery and the event subscription
//! - `governor`: whether the last decision round relieved memory pressure
//! - `transport`: delivery to the transfer tier. Unhealthy when no transfer
//!   is configured, degraded while any app's metrics keep failing to send.
//!
//! The agent is ready once initial discovery has run and nothing is unhealthy.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const REGISTRY: &str = "registry";
    pub const GOVERNOR: &str = "governor";
    pub const TRANSPORT: &str = "transport";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced coverage
    Degraded,
    /// Not doing its job at all
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix time of the last status change
    pub since: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
    /// Apps whose recent sends all failed
    undelivered: BTreeSet<String>,
}

impl HealthState {
    fn set(&mut self, name: &str, status: ComponentStatus, message: Option<String>) {
        let unchanged = self
            .components
            .get(name)
            .is_some_and(|h| h.status == status && h.message == message);
        if !unchanged {
            self.components
                .insert(name.to_string(), ComponentHealth::new(status, message));
        }
    }

    /// Worst status over all components
    fn overall(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }

    fn refresh_transport(&mut self) {
        let no_transfers = self
            .components
            .get(components::TRANSPORT)
            .is_some_and(|h| h.status == ComponentStatus::Unhealthy);
        if no_transfers {
            return;
        }

        match self.undelivered.len() {
            0 => self.set(components::TRANSPORT, ComponentStatus::Healthy, None),
            n => self.set(
                components::TRANSPORT,
                ComponentStatus::Degraded,
                Some(format!("Metrics undelivered for {} app(s)", n)),
            ),
        }
    }
}

/// Shared health state of the agent
#[derive(Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Healthy, None);
    }

    pub async fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(name)
            .map(|h| h.status)
    }

    pub async fn set_healthy(&self, name: &str) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Healthy, None);
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Degraded, Some(message.into()));
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.state
            .write()
            .await
            .set(name, ComponentStatus::Unhealthy, Some(message.into()));
    }

    /// Record whether an app's metrics are currently failing to send and
    /// recompute the transport component
    pub async fn set_undelivered(&self, container_id: &str, undelivered: bool) {
        let mut state = self.state.write().await;
        let changed = if undelivered {
            state.undelivered.insert(container_id.to_string())
        } else {
            state.undelivered.remove(container_id)
        };
        if changed {
            state.refresh_transport();
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.overall(),
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Initial container discovery not finished")
        } else if state.overall() == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
