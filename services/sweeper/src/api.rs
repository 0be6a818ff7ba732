//! Status and admin HTTP API
//!
//! Read endpoints expose the snapshot and Prometheus metrics; write
//! endpoints trigger the reconciliation loop and the deletion executor.
//! Everything here delegates to the `Sweeper` context object, which
//! serializes cycles itself; a trigger during a running cycle reports
//! `started: false` instead of queueing.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::limit::ConcurrencyLimitLayer;
use tracing::info;

use crate::sweeper::Sweeper;

#[derive(Clone)]
pub struct AppState {
    pub sweeper: Arc<Sweeper>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/run", post(run))
        .route("/delete-invalid", post(delete_invalid))
        .route("/entries/{identity}", delete(delete_entry))
        .layer(ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.sweeper.registry().stats().await;
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "cycles": state.sweeper.cycle(),
        "running": state.sweeper.is_running(),
        "tracked": stats.total,
        "deletable": stats.deletable,
    }))
}

async fn status(State(state): State<AppState>) -> Json<crate::sweeper::Snapshot> {
    Json(state.sweeper.snapshot().await)
}

async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

/// Trigger a cycle without waiting for it.
async fn run(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.sweeper.is_running() {
        return (StatusCode::CONFLICT, Json(json!({ "started": false })));
    }
    info!("cycle triggered via API");
    let sweeper = state.sweeper.clone();
    tokio::spawn(async move { sweeper.run_cycle(false).await });
    (StatusCode::ACCEPTED, Json(json!({ "started": true })))
}

/// Delete every current deletion-eligible entry, waiting for the result.
async fn delete_invalid(State(state): State<AppState>) -> Json<Value> {
    let deleted = state.sweeper.delete_all().await;
    Json(json!({
        "deleted": deleted,
        "names": state.sweeper.last_deleted().await,
        "error": state.sweeper.last_error().await,
    }))
}

/// Delete one tracked entry by identity.
async fn delete_entry(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.sweeper.delete_one(&identity, true).await {
        (StatusCode::OK, Json(json!({ "deleted": true })))
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({
                "deleted": false,
                "error": state.sweeper.last_error().await,
            })),
        )
    }
}
