//! Observability infrastructure for the telemetry agent
//!
//! Provides:
//! - Prometheus metrics (collection latency, send outcomes, governor activity)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AgentMetricsInner {
    collection_latency_seconds: Histogram,
    apps_registered: IntGauge,
    collection_errors: IntCounter,
    records_sent: IntCounter,
    send_failures: IntCounter,
    governor_decisions: IntCounter,
    evictions: IntCounter,
    eviction_failures: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram!(
                "container_agent_collection_latency_seconds",
                "Time spent taking one snapshot of a container's counters",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            apps_registered: register_int_gauge!(
                "container_agent_apps_registered",
                "Number of containers currently being monitored"
            )
            .expect("Failed to register apps_registered"),

            collection_errors: register_int_counter!(
                "container_agent_collection_errors_total",
                "Total number of skipped collection ticks"
            )
            .expect("Failed to register collection_errors"),

            records_sent: register_int_counter!(
                "container_agent_records_sent_total",
                "Total number of metric records accepted by the transfer"
            )
            .expect("Failed to register records_sent"),

            send_failures: register_int_counter!(
                "container_agent_send_failures_total",
                "Total number of metric batches dropped after a failed send"
            )
            .expect("Failed to register send_failures"),

            governor_decisions: register_int_counter!(
                "container_agent_governor_decisions_total",
                "Total number of completed memory governor rounds"
            )
            .expect("Failed to register governor_decisions"),

            evictions: register_int_counter!(
                "container_agent_evictions_total",
                "Total number of containers stopped for exceeding the memory ceiling"
            )
            .expect("Failed to register evictions"),

            eviction_failures: register_int_counter!(
                "container_agent_eviction_failures_total",
                "Total number of container stops that failed"
            )
            .expect("Failed to register eviction_failures"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn set_apps_registered(&self, count: i64) {
        self.inner().apps_registered.set(count);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    pub fn add_records_sent(&self, count: u64) {
        self.inner().records_sent.inc_by(count);
    }

    pub fn inc_send_failures(&self) {
        self.inner().send_failures.inc();
    }

    pub fn inc_governor_decisions(&self) {
        self.inner().governor_decisions.inc();
    }

    pub fn inc_evictions(&self) {
        self.inner().evictions.inc();
    }

    pub fn inc_eviction_failures(&self) {
        self.inner().eviction_failures.inc();
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted logging for app lifecycle and
/// governor decisions.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log an app admitted into the registry
    pub fn log_app_admitted(&self, container_id: &str, endpoint: &str) {
        info!(
            event = "app_admitted",
            node = %self.node_name,
            container_id = %container_id,
            endpoint = %endpoint,
            "Metrics report start"
        );
    }

    /// Log an app rejected because its initial probe failed
    pub fn log_app_rejected(&self, container_id: &str, reason: &str) {
        info!(
            event = "app_rejected",
            node = %self.node_name,
            container_id = %container_id,
            reason = %reason,
            "Initial metric probe failed, container not monitored"
        );
    }

    /// Log an app removed from the registry
    pub fn log_app_removed(&self, container_id: &str) {
        info!(
            event = "app_removed",
            node = %self.node_name,
            container_id = %container_id,
            "Metrics report stop requested"
        );
    }

    /// Log a container stopped by the memory governor
    pub fn log_eviction(
        &self,
        container_id: &str,
        memory_usage: u64,
        overage_ratio: f64,
        success: bool,
    ) {
        if success {
            info!(
                event = "soft_oom_kill",
                node = %self.node_name,
                container_id = %container_id,
                memory_usage = memory_usage,
                overage_ratio = overage_ratio,
                "Stopped container over memory ceiling"
            );
        } else {
            warn!(
                event = "soft_oom_kill_failed",
                node = %self.node_name,
                container_id = %container_id,
                memory_usage = memory_usage,
                overage_ratio = overage_ratio,
                "Failed to stop container over memory ceiling"
            );
        }
    }

    /// Log a round where the ceiling could not be met
    pub fn log_pressure_unrelieved(&self, remaining_usage: u64, ceiling: u64) {
        warn!(
            event = "memory_pressure_unrelieved",
            node = %self.node_name,
            remaining_usage = remaining_usage,
            ceiling = ceiling,
            "No container with a declared memory limit left to stop"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, memory_ceiling: u64) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            memory_ceiling = memory_ceiling,
            "Container agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Container agent shutting down"
        );
    }
}
