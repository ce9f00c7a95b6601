//! Docker Engine implementation of the runtime and discovery traits

use super::discovery::{ContainerEvent, ContainerSource, ContainerSummary};
use super::{ContainerRuntime, ProbeSession, RuntimeStats};
use crate::error::{CollectError, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    ListContainersOptions, LogOutput, MemoryStatsStats, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Seconds the Docker client waits on a single request
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Buffer of the forwarded event channel
const EVENT_BUFFER: usize = 256;

/// Shell kept running in every monitored container
const PROBE_SHELL: [&str; 1] = ["sh"];

/// Container runtime backed by the Docker Engine API
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to `endpoint` (`unix://...`, `tcp://...` or `http://...`),
    /// or to the local default socket when it is empty
    pub fn connect(endpoint: &str) -> Result<Self, RuntimeError> {
        let connected = if endpoint.is_empty() {
            Docker::connect_with_local_defaults()
        } else if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            let addr = endpoint.replacen("tcp://", "http://", 1);
            Docker::connect_with_http(&addr, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        };

        let docker = connected
            .map_err(|e| RuntimeError::new("-", format!("connect to docker: {}", e)))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn stats(&self, container_id: &str) -> Result<RuntimeStats, CollectError> {
        let mut stream = Box::pin(self.docker.stats(
            container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        ));

        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => return Err(CollectError::Runtime(e.to_string())),
            None => return Err(CollectError::StatsUnavailable(container_id.to_string())),
        };

        let cpu = &stats.cpu_stats.cpu_usage;
        let memory = &stats.memory_stats;
        let mem_rss = match &memory.stats {
            Some(MemoryStatsStats::V1(v1)) => v1.rss,
            Some(MemoryStatsStats::V2(v2)) => v2.anon,
            None => 0,
        };

        Ok(RuntimeStats {
            cpu_user: cpu.usage_in_usermode,
            cpu_system: cpu.usage_in_kernelmode,
            cpu_total: cpu.total_usage,
            mem_usage: memory.usage.unwrap_or(0),
            mem_max_usage: memory.max_usage.unwrap_or(0),
            mem_rss,
        })
    }

    async fn open_probe_session(
        &self,
        container_id: &str,
        command: &str,
    ) -> Result<ProbeSession, CollectError> {
        let session_error = |e: bollard::errors::Error| CollectError::ProbeSession {
            container_id: container_id.to_string(),
            message: e.to_string(),
        };

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(false),
                    cmd: Some(PROBE_SHELL.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(session_error)?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(session_error)?;

        let (output, input) = match started {
            StartExecResults::Attached { output, input } => (output, input),
            StartExecResults::Detached => {
                return Err(CollectError::ProbeSession {
                    container_id: container_id.to_string(),
                    message: "exec started detached".to_string(),
                })
            }
        };

        let output = output.map(|chunk| match chunk {
            Ok(LogOutput::StdOut { message }) => Ok(message.to_vec()),
            Ok(_) => Ok(Vec::new()),
            Err(e) => Err(CollectError::Probe(e.to_string())),
        });

        debug!(container_id = %container_id, exec_id = %exec.id, "Started probe shell");
        Ok(ProbeSession::new(
            container_id,
            command,
            input,
            Box::pin(output),
        ))
    }

    async fn stop_container(
        &self,
        container_id: &str,
        grace: Duration,
    ) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await
            .map_err(|e| RuntimeError::new(container_id, e))
    }
}

#[async_trait]
impl ContainerSource for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::new("-", format!("list containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c.names.and_then(|names| names.into_iter().next())?;
                Some(ContainerSummary {
                    id,
                    name,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ContainerEvent>, RuntimeError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            filters.insert(
                "event".to_string(),
                vec!["start".to_string(), "die".to_string(), "destroy".to_string()],
            );

            let mut stream = Box::pin(docker.events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            })));

            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        // dropping the sender tells the watcher to resubscribe
                        warn!(error = %e, "Docker event stream failed");
                        break;
                    }
                };

                let Some(actor) = message.actor else { continue };
                let Some(id) = actor.id else { continue };
                let mut attributes = actor.attributes.unwrap_or_default();

                let event = match message.action.as_deref() {
                    Some("start") => {
                        let Some(name) = attributes.remove("name") else { continue };
                        attributes.remove("image");
                        ContainerEvent::Started(ContainerSummary {
                            id,
                            name,
                            labels: attributes,
                        })
                    }
                    Some("die") | Some("destroy") => ContainerEvent::Stopped(id),
                    _ => continue,
                };

                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
