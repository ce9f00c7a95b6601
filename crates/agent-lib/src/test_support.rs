//! Mock runtime, transport and store shared by the collector and governor
//! tests

use crate::collector::{
    async_trait, CollectorConfig, ContainerRuntime, ProbeSession, RuntimeStats, StatCollector,
    NETDEV_COMMAND,
};
use crate::error::{CollectError, RuntimeError, StoreError, TransportError};
use crate::health::HealthRegistry;
use crate::models::{AppIdentity, AppMeta, Extend, MetricRecord, UsageReport, MEMORY_LIMIT_KEY};
use crate::registry::{AppRegistry, AppRegistryBuilder};
use crate::store::CoordinationStore;
use crate::sync::{MetricTransport, TransferAck, TransportFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const NETDEV_OUTPUT: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 500 5 0 0 0 0 0 0 500 5 0 0 0 0 0 0
 vnbe1: 1000 2 0 0 0 0 0 0 500 3 0 0 0 0 0 0
";

/// How the in-container shell answers probe commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// Print the current counters and the end marker
    Respond,
    /// Exit, closing the session
    Exit,
    /// Read the command and never answer
    Hang,
}

/// Mock runtime whose counters can be changed between ticks.
///
/// Every probe session is a task standing in for a shell: it reads command
/// lines from the session's input and answers on its output, so a session
/// only works while that one task is alive.
pub struct MockRuntime {
    stats: Mutex<RuntimeStats>,
    netdev: Arc<Mutex<String>>,
    shell_mode: Arc<Mutex<ShellMode>>,
    pub fail_stats: AtomicBool,
    pub fail_session: AtomicBool,
    pub fail_stop: AtomicBool,
    pub sessions_opened: AtomicUsize,
    pub commands_run: Arc<AtomicUsize>,
    stopped: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(RuntimeStats {
                mem_usage: 100,
                mem_max_usage: 150,
                mem_rss: 80,
                ..Default::default()
            }),
            netdev: Arc::new(Mutex::new(
                " vnbe1: 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n".to_string(),
            )),
            shell_mode: Arc::new(Mutex::new(ShellMode::Respond)),
            fail_stats: AtomicBool::new(false),
            fail_session: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            sessions_opened: AtomicUsize::new(0),
            commands_run: Arc::new(AtomicUsize::new(0)),
            stopped: Mutex::new(Vec::new()),
        }
    }

    pub fn set_stats(&self, stats: RuntimeStats) {
        *self.stats.lock().unwrap() = stats;
    }

    pub fn set_netdev(&self, output: &str) {
        *self.netdev.lock().unwrap() = output.to_string();
    }

    pub fn set_shell_mode(&self, mode: ShellMode) {
        *self.shell_mode.lock().unwrap() = mode;
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn commands_run(&self) -> usize {
        self.commands_run.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn stats(&self, container_id: &str) -> Result<RuntimeStats, CollectError> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(CollectError::StatsUnavailable(container_id.to_string()));
        }
        Ok(*self.stats.lock().unwrap())
    }

    async fn open_probe_session(
        &self,
        container_id: &str,
        command: &str,
    ) -> Result<ProbeSession, CollectError> {
        assert_eq!(command, NETDEV_COMMAND);
        if self.fail_session.load(Ordering::SeqCst) {
            return Err(CollectError::ProbeSession {
                container_id: container_id.to_string(),
                message: "container is not running".to_string(),
            });
        }
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);

        let (input, shell_in) = tokio::io::duplex(4096);
        let (out_tx, out_rx) = mpsc::channel::<Result<Vec<u8>, CollectError>>(16);
        let netdev = self.netdev.clone();
        let mode = self.shell_mode.clone();
        let commands_run = self.commands_run.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(shell_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                commands_run.fetch_add(1, Ordering::SeqCst);
                let current = *mode.lock().unwrap();
                match current {
                    ShellMode::Respond => {
                        let marker = line.rsplit("echo ").next().unwrap_or_default();
                        let output = format!("{}{}\n", netdev.lock().unwrap(), marker);
                        // two chunks, split inside the counters
                        let (head, tail) = output.split_at(output.len() / 2);
                        if out_tx.send(Ok(head.as_bytes().to_vec())).await.is_err()
                            || out_tx.send(Ok(tail.as_bytes().to_vec())).await.is_err()
                        {
                            break;
                        }
                    }
                    ShellMode::Hang => {}
                    ShellMode::Exit => break,
                }
            }
        });

        Ok(ProbeSession::new(
            container_id,
            command,
            Box::pin(input),
            Box::pin(ReceiverStream::new(out_rx)),
        ))
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _grace: Duration,
    ) -> Result<(), RuntimeError> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::new(container_id, "container is paused"));
        }
        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}

/// Transport that records every batch it is given
#[derive(Default)]
pub struct RecordingTransport {
    batches: Mutex<Vec<Vec<MetricRecord>>>,
    pub fail: AtomicBool,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn batches(&self) -> Vec<Vec<MetricRecord>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricTransport for RecordingTransport {
    async fn update(&self, records: Vec<MetricRecord>) -> Result<TransferAck, TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Call("transfer unavailable".to_string()));
        }
        let total = records.len() as i32;
        self.batches.lock().unwrap().push(records);
        Ok(TransferAck {
            message: "ok".to_string(),
            total,
            ..Default::default()
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    pub transports: Mutex<HashMap<String, Arc<RecordingTransport>>>,
}

impl RecordingFactory {
    pub fn transport(&self, container_id: &str) -> Arc<RecordingTransport> {
        self.transports.lock().unwrap()[container_id].clone()
    }
}

impl TransportFactory for RecordingFactory {
    fn connect(&self, container_id: &str) -> Result<Arc<dyn MetricTransport>, TransportError> {
        let transport = Arc::new(RecordingTransport::default());
        self.transports
            .lock()
            .unwrap()
            .insert(container_id.to_string(), transport.clone());
        Ok(transport as Arc<dyn MetricTransport>)
    }
}

/// Store whose writes always fail
pub struct BrokenStore;

#[async_trait]
impl CoordinationStore for BrokenStore {
    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// App named `/{id}_web_x1`, optionally with a declared memory limit
pub fn app(container_id: &str, limit: Option<u64>) -> AppMeta {
    let identity =
        AppIdentity::from_container_name(container_id, &format!("/{}_web_x1", container_id))
            .unwrap();
    let mut extend = Extend::new();
    if let Some(limit) = limit {
        extend.insert(MEMORY_LIMIT_KEY.to_string(), serde_json::json!(limit));
    }
    AppMeta::new(identity, extend, "node-1")
}

pub fn usage(container_id: &str, memory_usage: u64) -> UsageReport {
    UsageReport {
        container_id: container_id.to_string(),
        memory_usage,
    }
}

pub struct Fixture {
    pub runtime: Arc<MockRuntime>,
    pub transports: Arc<RecordingFactory>,
    pub health: HealthRegistry,
    pub registry: Arc<AppRegistry>,
}

pub fn fixture() -> Fixture {
    let runtime = Arc::new(MockRuntime::new());
    let transports = Arc::new(RecordingFactory::default());
    let health = HealthRegistry::new();
    let collector = Arc::new(StatCollector::new(
        runtime.clone(),
        CollectorConfig::default(),
    ));

    let registry = AppRegistryBuilder::new()
        .collector(collector)
        .transports(transports.clone())
        .health(health.clone())
        .node_name("test-node")
        .build()
        .unwrap();

    Fixture {
        runtime,
        transports,
        health,
        registry: Arc::new(registry),
    }
}
