//! HTTP API for health checks, Prometheus metrics and the monitored app list

use agent_lib::{
    collector::ReporterState,
    health::{ComponentStatus, HealthRegistry},
    observability::AgentMetrics,
    registry::AppRegistry,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    pub registry: Option<Arc<AppRegistry>>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: AgentMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            registry: None,
        }
    }

    /// Expose the registry on `/apps`
    pub fn with_registry(mut self, registry: Arc<AppRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

/// One monitored app as listed by `/apps`
#[derive(Debug, Serialize)]
pub struct AppSummary {
    pub container_id: String,
    pub endpoint: String,
    pub memory_limit: Option<f64>,
    pub reporter: Option<ReporterState>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Monitored apps, sorted by container ID
async fn apps(State(state): State<Arc<AppState>>) -> Json<Vec<AppSummary>> {
    let Some(registry) = &state.registry else {
        return Json(Vec::new());
    };

    let mut ids = registry.ids().await;
    ids.sort();

    let mut summaries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(meta) = registry.lookup(&id).await {
            summaries.push(AppSummary {
                endpoint: meta.identity.endpoint(),
                memory_limit: meta.memory_limit(),
                reporter: registry.reporter_state(&id).await,
                container_id: id,
            });
        }
    }

    Json(summaries)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/apps", get(apps))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
