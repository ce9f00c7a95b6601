//! Container discovery and lifecycle tracking
//!
//! Follows the runtime's container events, admitting new apps into the
//! registry and removing stopped ones. Running containers are listed after
//! every (re)subscription so the registry matches the runtime again.

use crate::error::RuntimeError;
use crate::health::{components, HealthRegistry};
use crate::models::{AppIdentity, AppMeta, Extend};
use crate::registry::{Admission, AppRegistry};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A running container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Container lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// A container started running
    Started(ContainerSummary),
    /// A container died or was removed
    Stopped(String), // container_id
}

/// Source of running containers and their lifecycle events
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// Containers running right now
    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Subscribe to container start/stop events
    async fn subscribe(&self) -> Result<mpsc::Receiver<ContainerEvent>, RuntimeError>;
}

/// Settings used to turn containers into app records
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Host name stamped into every app's extend attributes
    pub hostname: String,
    /// Only labels starting with this prefix become extend attributes
    pub label_prefix: String,
    /// First wait before resubscribing to a lost event stream
    pub initial_backoff: Duration,
    /// Upper bound of the resubscribe wait
    pub max_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            hostname: "unknown".to_string(),
            label_prefix: String::new(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl WatcherConfig {
    /// Build an app record for a container, or `None` if its name does not
    /// follow the `name_entrypoint_ident` convention
    pub fn app_meta(&self, summary: &ContainerSummary) -> Option<AppMeta> {
        let identity = AppIdentity::from_container_name(&summary.id, &summary.name)?;

        let extend: Extend = summary
            .labels
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(self.label_prefix.as_str())
                    .filter(|key| !key.is_empty())
                    .map(|key| (key.to_string(), serde_json::Value::String(v.clone())))
            })
            .collect();

        Some(AppMeta::new(identity, extend, &self.hostname))
    }
}

/// Follows container events and keeps the registry in sync
pub struct ContainerWatcher {
    source: Arc<dyn ContainerSource>,
    registry: Arc<AppRegistry>,
    health: HealthRegistry,
    config: WatcherConfig,
}

impl ContainerWatcher {
    pub fn new(
        source: Arc<dyn ContainerSource>,
        registry: Arc<AppRegistry>,
        health: HealthRegistry,
        config: WatcherConfig,
    ) -> Self {
        Self {
            source,
            registry,
            health,
            config,
        }
    }

    /// Subscribe, sync with the running containers, then follow events in
    /// the background. Returns once the first sync attempt is done.
    ///
    /// A failed or lost subscription marks the registry degraded and is
    /// retried with exponential backoff; every new subscription is followed
    /// by a fresh sync.
    pub async fn start(self) -> WatcherHandle {
        let events = self.connect().await;
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(events, token.clone()));

        WatcherHandle { token, task }
    }

    async fn connect(&self) -> Option<mpsc::Receiver<ContainerEvent>> {
        // subscribe before listing so no start or stop falls between the two
        let events = match self.source.subscribe().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Failed to subscribe to container events");
                self.health
                    .set_degraded(components::REGISTRY, "Container event stream unavailable")
                    .await;
                return None;
            }
        };

        match discover_existing_containers(self.source.as_ref(), &self.registry, &self.config)
            .await
        {
            Ok(_) => self.health.set_healthy(components::REGISTRY).await,
            Err(e) => {
                warn!(error = %e, "Container discovery failed");
                self.health
                    .set_degraded(components::REGISTRY, "Container discovery failed")
                    .await;
            }
        }

        Some(events)
    }

    async fn run(
        self,
        mut events: Option<mpsc::Receiver<ContainerEvent>>,
        token: CancellationToken,
    ) {
        info!("Watching container events");
        let mut backoff = self.config.initial_backoff;

        loop {
            let Some(stream) = events.as_mut() else {
                debug!(backoff_secs = backoff.as_secs(), "Resubscribing to container events");
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }

                events = self.connect().await;
                backoff = if events.is_some() {
                    self.config.initial_backoff
                } else {
                    (backoff * 2).min(self.config.max_backoff)
                };
                continue;
            };

            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = stream.recv() => event,
            };

            match event {
                Some(event) => self.handle_event(event).await,
                None => {
                    warn!("Container event stream closed");
                    self.health
                        .set_degraded(components::REGISTRY, "Container event stream lost")
                        .await;
                    events = None;
                }
            }
        }

        debug!("Container watcher cancelled");
    }

    async fn handle_event(&self, event: ContainerEvent) {
        match event {
            ContainerEvent::Started(summary) => {
                admit(&self.registry, &self.config, &summary).await;
            }
            ContainerEvent::Stopped(container_id) => {
                if self.registry.remove(&container_id).await.is_some() {
                    debug!(container_id = %container_id, "Container stopped");
                }
            }
        }
    }
}

async fn admit(registry: &AppRegistry, config: &WatcherConfig, summary: &ContainerSummary) -> bool {
    let Some(meta) = config.app_meta(summary) else {
        debug!(
            container_id = %summary.id,
            name = %summary.name,
            "Container name not monitored"
        );
        return false;
    };
    registry.add(meta).await == Admission::Admitted
}

/// Handle to a running watcher
pub struct WatcherHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop following events and wait for the watcher task to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Container watcher task failed");
        }
    }
}

/// What one discovery pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Containers the runtime reported as running
    pub found: usize,
    pub admitted: usize,
    /// Registered apps whose container is no longer running
    pub removed: usize,
}

/// Admit every running container and drop registered apps whose container
/// is gone
pub async fn discover_existing_containers(
    source: &dyn ContainerSource,
    registry: &AppRegistry,
    config: &WatcherConfig,
) -> Result<DiscoveryReport, RuntimeError> {
    let containers = source.list_running().await?;
    let mut report = DiscoveryReport {
        found: containers.len(),
        ..Default::default()
    };

    for summary in &containers {
        if admit(registry, config, summary).await {
            report.admitted += 1;
        }
    }

    let running: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();
    for container_id in registry.ids().await {
        if !running.contains(container_id.as_str())
            && registry.remove(&container_id).await.is_some()
        {
            report.removed += 1;
        }
    }

    info!(
        found = report.found,
        admitted = report.admitted,
        removed = report.removed,
        "Synced with running containers"
    );
    Ok(report)
}
