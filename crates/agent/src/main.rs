//! Container Agent - per-container telemetry and memory governance
//!
//! Runs on every container host: follows the local Docker engine, reports
//! each container's resource usage to the transfer tier and stops the worst
//! memory offender when the host exceeds its configured ceiling.

use agent_lib::{
    collector::{ContainerWatcher, DockerRuntime, StatCollector},
    governor::{usage_channel, Governor},
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    registry::AppRegistryBuilder,
    store::{CoordinationStore, MemoryStore, RedisStore},
    sync::{GrpcTransportFactory, TransferRing},
};
use anyhow::{Context, Result};
use container_agent::{api, config::AgentConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AgentConfig::load().context("Failed to load configuration")?;
    info!(
        hostname = %config.hostname,
        transfers = config.metrics.transfers.len(),
        step_secs = config.metrics.step_secs,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::REGISTRY).await;
    health_registry.register(components::TRANSPORT).await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.hostname);
    logger.log_startup(AGENT_VERSION, config.limit.memory);

    let docker = Arc::new(
        DockerRuntime::connect(&config.docker.endpoint).context("Failed to connect to Docker")?,
    );

    let ring = TransferRing::new(config.metrics.transfers.clone());
    if ring.is_empty() {
        warn!("No transfer endpoints configured, containers will not be monitored");
        health_registry
            .set_unhealthy(components::TRANSPORT, "No transfer endpoints configured")
            .await;
    }
    let transports = Arc::new(GrpcTransportFactory::new(
        ring,
        config.transfer_client_config(),
    ));
    let collector = Arc::new(StatCollector::new(
        docker.clone(),
        config.collector_config(),
    ));

    let governor_config = config.governor_config();
    let mut builder = AppRegistryBuilder::new()
        .collector(collector)
        .transports(transports)
        .reporter_config(config.reporter_config())
        .health(health_registry.clone())
        .node_name(config.hostname.clone());

    let usage_rx = if governor_config.is_enabled() {
        let (usage_tx, usage_rx) = usage_channel(&governor_config);
        builder = builder.usage_sink(usage_tx);
        Some(usage_rx)
    } else {
        info!("No memory limit configured, governor disabled");
        None
    };
    let registry = Arc::new(builder.build()?);

    let shutdown = CancellationToken::new();
    let governor_handle = match usage_rx {
        Some(usage_rx) => {
            let governor = Governor::new(
                governor_config,
                usage_rx,
                registry.clone(),
                docker.clone(),
                coordination_store(&config).await,
                health_registry.clone(),
                logger.clone(),
            );
            Some(tokio::spawn(governor.run(shutdown.clone())))
        }
        None => None,
    };

    let watcher = ContainerWatcher::new(
        docker.clone(),
        registry.clone(),
        health_registry.clone(),
        config.watcher_config(),
    )
    .start()
    .await;

    let app_state = Arc::new(
        api::AppState::new(health_registry.clone(), metrics.clone()).with_registry(registry.clone()),
    );
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    watcher.stop().await;
    registry.shutdown().await;
    shutdown.cancel();
    if let Some(handle) = governor_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Governor task failed");
        }
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Redis when configured and reachable, in-process otherwise
async fn coordination_store(config: &AgentConfig) -> Arc<dyn CoordinationStore> {
    let Some(url) = &config.redis.url else {
        warn!("No redis url configured, kill reasons are kept in memory");
        return Arc::new(MemoryStore::new());
    };

    match RedisStore::connect(url).await {
        Ok(store) => {
            info!("Connected to coordination store");
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "Coordination store unavailable, kill reasons are kept in memory");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
