//! Memory eviction governor
//!
//! A single task that owns the round's usage table. Reporters post their
//! memory readings over a bounded channel; once every registered app has
//! posted, the governor decides which containers to stop, publishes a kill
//! reason for each and asks the runtime to stop them. The table is cleared
//! after every decision.

mod decision;

pub use decision::{overage_ratio, plan_evictions, Outcome, UsageTable, Victim};

use crate::collector::ContainerRuntime;
use crate::health::{components, HealthRegistry};
use crate::models::UsageReport;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::registry::AppRegistry;
use crate::store::{kill_reason_key, CoordinationStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Value of the kill reason record
pub const KILL_REASON: &str = "soft_oom_killed";

/// Configuration for the eviction governor
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Host-wide memory ceiling in bytes
    pub memory_ceiling: u64,
    /// Grace period given to a stopped container before it is killed
    pub stop_grace: Duration,
    /// Capacity of the usage report channel
    pub channel_capacity: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_ceiling: 0,
            stop_grace: Duration::from_secs(10),
            channel_capacity: 1024,
        }
    }
}

impl GovernorConfig {
    pub fn is_enabled(&self) -> bool {
        self.memory_ceiling > 0
    }
}

/// Channel carrying usage reports from reporters to the governor
pub fn usage_channel(
    config: &GovernorConfig,
) -> (mpsc::Sender<UsageReport>, mpsc::Receiver<UsageReport>) {
    mpsc::channel(config.channel_capacity.max(1))
}

pub struct Governor {
    config: GovernorConfig,
    usage_rx: mpsc::Receiver<UsageReport>,
    registry: Arc<AppRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn CoordinationStore>,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    table: UsageTable,
}

impl Governor {
    pub fn new(
        config: GovernorConfig,
        usage_rx: mpsc::Receiver<UsageReport>,
        registry: Arc<AppRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn CoordinationStore>,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            usage_rx,
            registry,
            runtime,
            store,
            health,
            metrics: AgentMetrics::new(),
            logger,
            table: UsageTable::new(),
        }
    }

    /// Consume usage reports until cancelled or every sender is gone
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            memory_ceiling = self.config.memory_ceiling,
            "Starting memory governor"
        );
        self.health.register(components::GOVERNOR).await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                report = self.usage_rx.recv() => match report {
                    Some(report) => {
                        self.handle_report(report).await;
                    }
                    None => break,
                }
            }
        }

        info!("Memory governor stopped");
    }

    /// Record one report and decide if the round is complete.
    /// Returns the outcome of the decision, if one ran.
    pub async fn handle_report(&mut self, report: UsageReport) -> Option<Outcome> {
        self.table
            .record(&report.container_id, report.memory_usage);

        let registered = self.registry.memory_limits().await;
        self.table.retain_registered(&registered);
        if !self.table.covers(&registered) {
            return None;
        }

        let outcome = plan_evictions(
            self.table.entries(),
            &registered,
            self.config.memory_ceiling,
        );
        self.table.clear();
        self.metrics.inc_governor_decisions();

        debug!(
            apps = registered.len(),
            total_usage = outcome.total_usage,
            victims = outcome.victims.len(),
            "Governor round complete"
        );

        for victim in &outcome.victims {
            self.evict(victim).await;
        }

        if outcome.unrelieved {
            self.logger
                .log_pressure_unrelieved(outcome.remaining_usage, self.config.memory_ceiling);
            self.health
                .set_degraded(
                    components::GOVERNOR,
                    "Memory ceiling exceeded with no evictable container",
                )
                .await;
        } else {
            self.health.set_healthy(components::GOVERNOR).await;
        }

        Some(outcome)
    }

    async fn evict(&self, victim: &Victim) {
        let key = kill_reason_key(&victim.container_id);
        if let Err(e) = self.store.set(&key, KILL_REASON).await {
            warn!(
                container_id = %victim.container_id,
                error = %e,
                "Failed to record kill reason"
            );
        }

        let result = self
            .runtime
            .stop_container(&victim.container_id, self.config.stop_grace)
            .await;

        match &result {
            Ok(()) => self.metrics.inc_evictions(),
            Err(e) => {
                self.metrics.inc_eviction_failures();
                warn!(error = %e, "Stop container failed");
            }
        }
        self.logger.log_eviction(
            &victim.container_id,
            victim.memory_usage,
            victim.overage_ratio,
            result.is_ok(),
        );
    }

    pub fn pending_reports(&self) -> usize {
        self.table.len()
    }
}
