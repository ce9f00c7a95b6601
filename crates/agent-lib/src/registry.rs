//! Registry of monitored apps
//!
//! Maps container ID to the app's metadata and the handle of its reporter.
//! All mutation goes through one reader-writer lock: `add` and `remove` take
//! it exclusively, lookups share it. Reporters never touch the registry, so
//! holding the write lock across the admission probe cannot deadlock with
//! them.

use crate::collector::{ReporterConfig, Reporter, ReporterHandle, ReporterState, StatCollector};
use crate::error::AdmitError;
use crate::health::HealthRegistry;
use crate::models::{AppMeta, UsageReport};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::sync::TransportFactory;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Result of `AppRegistry::add`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The app passed its initial probe and its reporter is running
    Admitted,
    /// An app with the same container ID is already registered
    AlreadyPresent,
    /// The initial probe failed; the app was discarded
    Rejected,
}

struct AppEntry {
    meta: Arc<AppMeta>,
    reporter: ReporterHandle,
}

/// Synchronized directory of active apps
pub struct AppRegistry {
    apps: RwLock<HashMap<String, AppEntry>>,
    collector: Arc<StatCollector>,
    transports: Arc<dyn TransportFactory>,
    usage_tx: Option<mpsc::Sender<UsageReport>>,
    health: Option<HealthRegistry>,
    config: ReporterConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl AppRegistry {
    pub fn new(
        collector: Arc<StatCollector>,
        transports: Arc<dyn TransportFactory>,
        config: ReporterConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            collector,
            transports,
            usage_tx: None,
            health: None,
            config,
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    /// Admit an app. Idempotent on container ID.
    ///
    /// The initial snapshot is taken while the write lock is held; if it
    /// fails the app is dropped and not retried.
    pub async fn add(&self, meta: AppMeta) -> Admission {
        let container_id = meta.container_id().to_string();
        let mut apps = self.apps.write().await;

        if apps.contains_key(&container_id) {
            debug!(container_id = %container_id, "App already registered");
            return Admission::AlreadyPresent;
        }

        let meta = Arc::new(meta);
        match self.start_reporter(meta.clone()).await {
            Ok(reporter) => {
                self.logger
                    .log_app_admitted(&container_id, &meta.identity.endpoint());
                apps.insert(container_id, AppEntry { meta, reporter });
                self.metrics.set_apps_registered(apps.len() as i64);
                Admission::Admitted
            }
            Err(e) => {
                self.logger.log_app_rejected(&container_id, &e.to_string());
                Admission::Rejected
            }
        }
    }

    async fn start_reporter(&self, meta: Arc<AppMeta>) -> Result<ReporterHandle, AdmitError> {
        let container_id = meta.container_id();
        let mut session = self.collector.open_session(container_id).await?;
        let baseline = self.collector.collect(container_id, &mut session).await?;
        let transport = self.transports.connect(container_id)?;

        let mut reporter = Reporter::new(
            meta,
            self.collector.clone(),
            session,
            baseline,
            transport,
            &self.config,
        );
        if let Some(usage_tx) = &self.usage_tx {
            reporter = reporter.with_usage_sink(usage_tx.clone());
        }
        if let Some(health) = &self.health {
            reporter = reporter.with_health(health.clone());
        }

        Ok(reporter.spawn())
    }

    /// Unregister an app and signal its reporter to stop.
    ///
    /// Returns the reporter handle so callers may wait for it; `None` if the
    /// ID was not registered.
    pub async fn remove(&self, container_id: &str) -> Option<ReporterHandle> {
        let mut apps = self.apps.write().await;
        let entry = apps.remove(container_id)?;
        self.metrics.set_apps_registered(apps.len() as i64);
        drop(apps);

        entry.reporter.stop();
        self.logger.log_app_removed(container_id);
        Some(entry.reporter)
    }

    pub async fn contains(&self, container_id: &str) -> bool {
        self.apps.read().await.contains_key(container_id)
    }

    pub async fn lookup(&self, container_id: &str) -> Option<Arc<AppMeta>> {
        self.apps
            .read()
            .await
            .get(container_id)
            .map(|entry| entry.meta.clone())
    }

    /// Current state of an app's reporter
    pub async fn reporter_state(&self, container_id: &str) -> Option<ReporterState> {
        self.apps
            .read()
            .await
            .get(container_id)
            .map(|entry| entry.reporter.state())
    }

    /// Registered IDs with each app's declared memory limit, read in one pass
    pub async fn memory_limits(&self) -> HashMap<String, Option<f64>> {
        self.apps
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.meta.memory_limit()))
            .collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.apps.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.apps.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.apps.read().await.is_empty()
    }

    /// Stop every reporter and wait for all of them to exit
    pub async fn shutdown(&self) {
        let drained: Vec<AppEntry> = {
            let mut apps = self.apps.write().await;
            apps.drain().map(|(_, entry)| entry).collect()
        };
        self.metrics.set_apps_registered(0);

        for entry in &drained {
            entry.reporter.stop();
        }

        let count = drained.len();
        for entry in drained {
            entry.reporter.join().await;
        }

        info!(reporters = count, "All reporters stopped");
    }
}

/// Builder for the app registry
pub struct AppRegistryBuilder {
    collector: Option<Arc<StatCollector>>,
    transports: Option<Arc<dyn TransportFactory>>,
    usage_tx: Option<mpsc::Sender<UsageReport>>,
    health: Option<HealthRegistry>,
    config: ReporterConfig,
    node_name: String,
}

impl AppRegistryBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            transports: None,
            usage_tx: None,
            health: None,
            config: ReporterConfig::default(),
            node_name: "unknown".to_string(),
        }
    }

    pub fn collector(mut self, collector: Arc<StatCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Feed every reporter's memory readings to the eviction governor
    pub fn usage_sink(mut self, usage_tx: mpsc::Sender<UsageReport>) -> Self {
        self.usage_tx = Some(usage_tx);
        self
    }

    /// Let reporters publish delivery failures to the transport component
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn reporter_config(mut self, config: ReporterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn build(self) -> Result<AppRegistry> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("Collector is required"))?;
        let transports = self
            .transports
            .ok_or_else(|| anyhow::anyhow!("Transport factory is required"))?;

        let mut registry = AppRegistry::new(
            collector,
            transports,
            self.config,
            StructuredLogger::new(self.node_name),
        );
        registry.usage_tx = self.usage_tx;
        registry.health = self.health;
        Ok(registry)
    }
}

impl Default for AppRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
