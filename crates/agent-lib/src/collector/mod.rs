//! Per-container metric collection
//!
//! This module provides the stat collector that takes one snapshot of an
//! app's counters per tick: CPU and memory counters from the container
//! runtime, and per-interface network counters read through a persistent
//! in-container probe session. It also hosts the per-app reporter loop and
//! container discovery.

mod discovery;
#[cfg(feature = "docker")]
mod docker;
mod r#loop;
mod netdev;
mod session;


pub use discovery::{
    discover_existing_containers, ContainerEvent, ContainerSource, ContainerSummary,
    ContainerWatcher, DiscoveryReport, WatcherConfig, WatcherHandle,
};
#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use netdev::{parse_net_dev, NETDEV_COMMAND};
pub use r#loop::{Reporter, ReporterConfig, ReporterHandle, ReporterState};
pub use session::{ProbeInput, ProbeOutput, ProbeSession, END_MARKER};

use crate::error::{CollectError, RuntimeError};
use crate::models::{metric, Snapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use async_trait::async_trait;

/// Default virtual-LAN interface prefix
pub const DEFAULT_VLAN_PREFIX: &str = "vnbe";

/// CPU and memory counters returned by one runtime stats call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Cumulative user-mode CPU time in nanoseconds
    pub cpu_user: u64,
    /// Cumulative kernel-mode CPU time in nanoseconds
    pub cpu_system: u64,
    /// Cumulative total CPU time in nanoseconds
    pub cpu_total: u64,
    pub mem_usage: u64,
    pub mem_max_usage: u64,
    pub mem_rss: u64,
}

/// Container runtime primitives consumed by the agent
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// One-shot CPU/memory counters for a container
    async fn stats(&self, container_id: &str) -> Result<RuntimeStats, CollectError>;

    /// Start a long-lived shell in the container that runs `command` on
    /// every `ProbeSession::run`
    async fn open_probe_session(
        &self,
        container_id: &str,
        command: &str,
    ) -> Result<ProbeSession, CollectError>;

    /// Request a graceful stop, killing after `grace`
    async fn stop_container(&self, container_id: &str, grace: Duration)
        -> Result<(), RuntimeError>;
}

/// Configuration for the stat collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Interface name prefix of the virtual LAN devices
    pub vlan_prefix: String,
    /// Deadline for one runtime stats call
    pub stats_timeout: Duration,
    /// Deadline for one probe run, including reading its output
    pub probe_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            vlan_prefix: DEFAULT_VLAN_PREFIX.to_string(),
            stats_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Takes snapshots of an app's counters
pub struct StatCollector {
    runtime: Arc<dyn ContainerRuntime>,
    config: CollectorConfig,
}

impl StatCollector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: CollectorConfig) -> Self {
        Self { runtime, config }
    }

    /// Open the network probe session used for the app's whole lifetime
    pub async fn open_session(&self, container_id: &str) -> Result<ProbeSession, CollectError> {
        with_deadline(
            "probe session",
            self.config.probe_timeout,
            self.runtime.open_probe_session(container_id, NETDEV_COMMAND),
        )
        .await
    }

    /// Take one snapshot. Any failure aborts the whole snapshot.
    ///
    /// A session broken by an earlier failure is replaced before use; a
    /// healthy one is reused as is.
    pub async fn collect(
        &self,
        container_id: &str,
        session: &mut ProbeSession,
    ) -> Result<Snapshot, CollectError> {
        if session.is_broken() {
            info!(container_id = %container_id, "Reopening probe session");
            *session = self.open_session(container_id).await?;
        }

        let stats = with_deadline(
            "stats",
            self.config.stats_timeout,
            self.runtime.stats(container_id),
        )
        .await?;

        let mut snapshot = Snapshot::new();
        snapshot.insert(metric::CPU_USER.to_string(), stats.cpu_user);
        snapshot.insert(metric::CPU_SYSTEM.to_string(), stats.cpu_system);
        snapshot.insert(metric::CPU_USAGE.to_string(), stats.cpu_total);
        snapshot.insert(metric::MEM_USAGE.to_string(), stats.mem_usage);
        snapshot.insert(metric::MEM_MAX_USAGE.to_string(), stats.mem_max_usage);
        snapshot.insert(metric::MEM_RSS.to_string(), stats.mem_rss);

        let output = with_deadline("network probe", self.config.probe_timeout, session.run())
            .await
            .map_err(|e| {
                // a run abandoned at the deadline leaves unread output behind
                session.mark_broken();
                e
            })?;

        let network = parse_net_dev(&output, &self.config.vlan_prefix);
        tracing::trace!(
            container_id = %container_id,
            interfaces = network.len() / 8,
            "Container network counters"
        );
        snapshot.extend(network);

        Ok(snapshot)
    }
}

async fn with_deadline<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T, CollectError>>,
) -> Result<T, CollectError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollectError::Timeout { operation, timeout }),
    }
}
