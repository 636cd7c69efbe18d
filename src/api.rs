//! Health & Status API endpoints
//!
//! - GET /health  - JSON health summary
//! - GET /healthz - Liveness probe
//! - GET /metrics - Prometheus metrics
//! - GET /status  - Message counts by status

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::{eyre, Result, WrapErr};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::metrics;
use crate::store::{CheckpointStore, StateStore};
use crate::types::Status;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub states: Arc<dyn StateStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub source_chain: String,
    pub started: Instant,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub source_chain: String,
    pub last_processed_block: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub messages: BTreeMap<String, u64>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let last_processed_block = state
        .checkpoints
        .last_height(&state.source_chain)
        .await
        .unwrap_or(None);

    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        source_chain: state.source_chain.clone(),
        last_processed_block,
    })
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Response {
    match state.states.count_by_status().await {
        Ok(counts) => {
            // Report every status, including empty ones
            let messages = Status::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
                .collect();
            Json(StatusResponse { messages }).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Failed to read message store: {}", e),
        )
            .into_response(),
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve on an already bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    metrics::UP.set(1.0);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("API server failed")?;

    metrics::UP.set(0.0);
    Ok(())
}

/// Bind and start the API server
pub async fn start_api_server(
    bind_address: &str,
    port: u16,
    state: AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;

    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server to {}", addr))?;
    info!(%addr, "API server listening");

    serve(listener, state, shutdown).await
}
