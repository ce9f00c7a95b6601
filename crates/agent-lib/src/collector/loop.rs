//! Per-app reporting loop
//!
//! Every admitted app gets its own `Reporter` task that ticks on its own
//! period: take a snapshot, turn counter growth into rates, hand the records
//! to the app's transport without waiting for the result, post the memory
//! reading to the governor, and promote the snapshot to the new baseline.
//! Cycles of one app never overlap. A stop request is observed between
//! cycles; an in-flight send finishes on its own.
//!
//! Send outcomes are counted by the detached send tasks and folded into the
//! transport health by the reporter itself at the start of the next cycle.

use super::{ProbeSession, StatCollector};
use crate::health::HealthRegistry;
use crate::models::{metric, AppMeta, MetricRecord, MetricValue, Rates, Snapshot, UsageReport, GAUGE};
use crate::observability::AgentMetrics;
use crate::rate::{self, RateEngine};
use crate::sync::MetricTransport;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration shared by all reporters
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Reporting period of every app (default: 10 seconds)
    pub step: Duration,
    /// Interface name prefix whose counters are rated
    pub vlan_prefix: String,
    /// Consecutive failed sends after which the app counts as undelivered
    pub delivery_failure_threshold: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(10),
            vlan_prefix: super::DEFAULT_VLAN_PREFIX.to_string(),
            delivery_failure_threshold: 3,
        }
    }
}

/// Where a reporter currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterState {
    Idle,
    Collecting,
    Rating,
    Sending,
    Terminated,
}

/// Collection state of one app, owned by its reporter task
pub struct Reporter {
    meta: Arc<AppMeta>,
    collector: Arc<StatCollector>,
    session: ProbeSession,
    transport: Arc<dyn MetricTransport>,
    engine: RateEngine,
    usage_tx: Option<mpsc::Sender<UsageReport>>,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
    step: Duration,
    /// Consecutive failed sends, updated by the send tasks
    send_failures: Arc<AtomicU32>,
    failure_threshold: u32,
    /// Whether health currently lists this app as undelivered
    undelivered: bool,
    /// Working snapshot of the current cycle
    info: Snapshot,
    /// Last successful snapshot
    save: Snapshot,
    rate: Rates,
    last_success: Instant,
    last_timestamp: i64,
    state: watch::Sender<ReporterState>,
    token: CancellationToken,
}

impl Reporter {
    /// Create a reporter whose baseline is the snapshot taken at admission
    pub fn new(
        meta: Arc<AppMeta>,
        collector: Arc<StatCollector>,
        session: ProbeSession,
        baseline: Snapshot,
        transport: Arc<dyn MetricTransport>,
        config: &ReporterConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReporterState::Idle);
        Self {
            meta,
            collector,
            session,
            transport,
            engine: RateEngine::new(config.vlan_prefix.clone()),
            usage_tx: None,
            health: None,
            metrics: AgentMetrics::new(),
            step: config.step,
            send_failures: Arc::new(AtomicU32::new(0)),
            failure_threshold: config.delivery_failure_threshold.max(1),
            undelivered: false,
            info: Snapshot::new(),
            save: baseline,
            rate: Rates::new(),
            last_success: Instant::now(),
            last_timestamp: chrono::Utc::now().timestamp(),
            state,
            token: CancellationToken::new(),
        }
    }

    /// Post memory readings to the eviction governor
    pub fn with_usage_sink(mut self, usage_tx: mpsc::Sender<UsageReport>) -> Self {
        self.usage_tx = Some(usage_tx);
        self
    }

    /// Report repeated delivery failures to the transport health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.save
    }

    pub fn rates(&self) -> &Rates {
        &self.rate
    }

    /// Start the reporter task
    pub fn spawn(self) -> ReporterHandle {
        let token = self.token.clone();
        let state = self.state.subscribe();
        let container_id = self.meta.container_id().to_string();
        let task = tokio::spawn(self.run());

        ReporterHandle {
            container_id,
            token,
            state,
            task,
        }
    }

    async fn run(mut self) {
        let token = self.token.clone();
        info!(
            container_id = %self.meta.identity.short_id(),
            step_secs = self.step.as_secs(),
            "Starting reporter"
        );

        let mut ticker = interval_at(Instant::now() + self.step, self.step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.cycle().await;
        }

        self.transport.close().await;
        if self.undelivered {
            if let Some(health) = &self.health {
                health.set_undelivered(self.meta.container_id(), false).await;
            }
        }
        self.state.send_replace(ReporterState::Terminated);
        info!(
            container_id = %self.meta.identity.short_id(),
            "Reporter stopped"
        );
    }

    /// Run one collection cycle. Returns false if the snapshot failed and the
    /// cycle was skipped.
    pub async fn cycle(&mut self) -> bool {
        self.report_delivery().await;
        let container_id = self.meta.container_id();

        self.state.send_replace(ReporterState::Collecting);
        let started = Instant::now();
        let snapshot = match self.collector.collect(container_id, &mut self.session).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.inc_collection_errors();
                warn!(
                    container_id = %self.meta.identity.short_id(),
                    error = %e,
                    "Collection failed, skipping cycle"
                );
                self.state.send_replace(ReporterState::Idle);
                return false;
            }
        };
        self.metrics
            .observe_collection_latency(started.elapsed().as_secs_f64());
        self.info = snapshot;

        self.state.send_replace(ReporterState::Rating);
        let now = Instant::now();
        self.engine.apply(
            &self.save,
            &self.info,
            now.duration_since(self.last_success),
            &mut self.rate,
        );
        self.last_success = now;
        self.last_timestamp = chrono::Utc::now().timestamp();

        self.state.send_replace(ReporterState::Sending);
        self.send(self.records());
        self.post_usage();

        rate::promote(&mut self.save, &mut self.info);
        self.state.send_replace(ReporterState::Idle);
        true
    }

    /// Memory readings of the working snapshot plus every computed rate
    fn records(&self) -> Vec<MetricRecord> {
        let endpoint = self.meta.identity.endpoint();
        let tags = self.meta.tags();
        let step = self.step.as_secs() as i64;

        let record = |name: &str, value: MetricValue| MetricRecord {
            endpoint: endpoint.clone(),
            metric: name.to_string(),
            value,
            step,
            counter_type: GAUGE.to_string(),
            tags: tags.clone(),
            timestamp: self.last_timestamp,
        };

        let memory = self
            .info
            .iter()
            .filter(|(k, _)| k.starts_with(metric::MEM_PREFIX))
            .map(|(k, v)| record(k, MetricValue::Int(*v)));
        let rates = self
            .rate
            .iter()
            .map(|(k, v)| record(k, MetricValue::Float(*v)));

        memory.chain(rates).collect()
    }

    /// Publish a change in this app's delivery state to health
    async fn report_delivery(&mut self) {
        let undelivered = self.send_failures.load(Ordering::SeqCst) >= self.failure_threshold;
        if undelivered == self.undelivered {
            return;
        }
        self.undelivered = undelivered;

        if undelivered {
            warn!(
                container_id = %self.meta.identity.short_id(),
                failures = self.send_failures.load(Ordering::SeqCst),
                "Metrics repeatedly undelivered"
            );
        }
        if let Some(health) = &self.health {
            health
                .set_undelivered(self.meta.container_id(), undelivered)
                .await;
        }
    }

    fn send(&self, records: Vec<MetricRecord>) {
        if records.is_empty() {
            return;
        }

        let transport = self.transport.clone();
        let metrics = self.metrics.clone();
        let failures = self.send_failures.clone();
        let container_id = self.meta.identity.short_id().to_string();

        tokio::spawn(async move {
            let count = records.len();
            match transport.update(records).await {
                Ok(ack) => {
                    failures.store(0, Ordering::SeqCst);
                    metrics.add_records_sent(count as u64);
                    debug!(
                        container_id = %container_id,
                        sent = count,
                        accepted = ack.total,
                        invalid = ack.invalid,
                        "Metrics sent"
                    );
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::SeqCst);
                    metrics.inc_send_failures();
                    warn!(
                        container_id = %container_id,
                        records = count,
                        error = %e,
                        "Send metrics failed, batch dropped"
                    );
                }
            }
        });
    }

    fn post_usage(&self) {
        let Some(usage_tx) = &self.usage_tx else {
            return;
        };

        let report = UsageReport {
            container_id: self.meta.container_id().to_string(),
            memory_usage: self.info.get(metric::MEM_USAGE).copied().unwrap_or(0),
        };

        match usage_tx.try_send(report) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    container_id = %self.meta.identity.short_id(),
                    "Governor channel full, usage report dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    container_id = %self.meta.identity.short_id(),
                    "Governor stopped, usage report dropped"
                );
            }
        }
    }
}

/// Handle to a running reporter task
pub struct ReporterHandle {
    container_id: String,
    token: CancellationToken,
    state: watch::Receiver<ReporterState>,
    task: JoinHandle<()>,
}

impl ReporterHandle {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Ask the reporter to stop. Does not wait for it.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> ReporterState {
        *self.state.borrow()
    }

    /// Follow state changes, including the final `Terminated`
    pub fn watch_state(&self) -> watch::Receiver<ReporterState> {
        self.state.clone()
    }

    /// Wait for the reporter task to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(
                container_id = %self.container_id,
                error = %e,
                "Reporter task failed"
            );
        }
    }
}
