use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "health"
)]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cws-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reports whether the cluster API answers a namespace listing.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses((status = 200, description = "Readiness report")),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let cluster_ok = state.orchestrator.list_workspaces().await.is_ok();

    Json(json!({
        "status": if cluster_ok { "ready" } else { "not_ready" },
        "service": "cws-api",
        "version": env!("CARGO_PKG_VERSION"),
        "cluster": state.orchestrator.cluster_name(),
        "clusterReachable": cluster_ok
    }))
}
